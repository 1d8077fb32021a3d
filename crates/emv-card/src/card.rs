//! Card model for one session

use std::fmt;

use crate::application::Application;

/// Payment System Environment names
pub mod directories {
    /// PSE (Payment System Environment)
    pub const PSE: &[u8] = b"1PAY.SYS.DDF01";

    /// PPSE (Proximity Payment System Environment)
    pub const PPSE: &[u8] = b"2PAY.SYS.DDF01";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterfaceType {
    #[default]
    Contact,
    Contactless,
}

impl fmt::Display for InterfaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterfaceType::Contact => f.write_str("Contact"),
            InterfaceType::Contactless => f.write_str("Contactless"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryKind {
    Pse,
    Ppse,
}

impl DirectoryKind {
    pub fn name(self) -> &'static [u8] {
        match self {
            DirectoryKind::Pse => directories::PSE,
            DirectoryKind::Ppse => directories::PPSE,
        }
    }
}

/// Payment system directory selected during discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directory {
    pub kind: DirectoryKind,
    /// SFI of the directory elementary file, if the FCI named one
    pub sfi: Option<u8>,
    pub fci: Vec<u8>,
}

/// Everything known about the card in the reader
#[derive(Debug, Clone, Default)]
pub struct Card {
    pub atr: Vec<u8>,
    pub interface: InterfaceType,
    pub directory: Option<Directory>,
    /// FCI of the master file, when probed and present
    pub master_file: Option<Vec<u8>>,
    /// Candidate applications in priority order
    pub applications: Vec<Application>,
    pub(crate) selected: Option<usize>,
}

impl Card {
    pub fn new(atr: Vec<u8>) -> Self {
        Self {
            atr,
            ..Self::default()
        }
    }

    pub fn aids(&self) -> impl Iterator<Item = &[u8]> {
        self.applications.iter().map(|a| a.aid.as_slice())
    }

    pub fn application(&self, aid: &[u8]) -> Option<&Application> {
        self.applications.iter().find(|a| a.aid == aid)
    }

    pub fn selected_application(&self) -> Option<&Application> {
        self.selected.and_then(|i| self.applications.get(i))
    }

    pub fn selected_application_mut(&mut self) -> Option<&mut Application> {
        self.selected.and_then(|i| self.applications.get_mut(i))
    }

    /// Order candidates by priority: lower first, unprioritized last
    ///
    /// The sort is stable, so equal priorities keep discovery order.
    pub(crate) fn sort_by_priority(&mut self) {
        self.applications
            .sort_by_key(|a| a.priority.map_or(u16::MAX, u16::from));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app(aid: u8, priority: Option<u8>) -> Application {
        Application {
            priority,
            ..Application::new(&[0xA0, 0x00, 0x00, 0x00, aid])
        }
    }

    #[test]
    fn test_priority_order() {
        let mut card = Card::new(vec![0x3B]);
        card.applications = vec![app(1, None), app(2, Some(2)), app(3, Some(1)), app(4, None), app(5, Some(2))];
        card.sort_by_priority();

        let order: Vec<u8> = card.aids().map(|aid| aid[4]).collect();
        assert_eq!(order, vec![3, 2, 5, 1, 4]);
    }

    #[test]
    fn test_selected_application() {
        let mut card = Card::new(vec![0x3B]);
        card.applications = vec![app(1, None), app(2, None)];
        assert!(card.selected_application().is_none());

        card.selected = Some(1);
        assert_eq!(card.selected_application().map(|a| a.aid[4]), Some(2));
        assert!(card.application(&[0xA0, 0x00, 0x00, 0x00, 0x01]).is_some());
    }
}
