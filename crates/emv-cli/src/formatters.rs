//! Field formatters for human-readable output

use clap::ValueEnum;
use emv_common::util::{bcd_to_digits, be_uint};
use emv_common::{TagRegistry, ValueType};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum FormatMode {
    /// Raw hex output
    Raw,
    /// Human-readable formatted output
    Human,
}

impl FormatMode {
    pub fn description(&self) -> &'static str {
        match self {
            FormatMode::Raw => "Raw",
            FormatMode::Human => "Human-Readable",
        }
    }
}

pub fn check(flag: bool) -> &'static str {
    if flag {
        "✓"
    } else {
        "✗"
    }
}

/// Format a field value based on its tag
///
/// Tags without a dedicated rendering fall back to their registry value type.
pub fn format_value(tags: &TagRegistry, tag: &[u8], value: &[u8], mode: FormatMode) -> String {
    if mode == FormatMode::Raw {
        return hex::encode_upper(value);
    }

    match tag {
        // Application Expiration Date (YYMMDD)
        [0x5F, 0x24] if value.len() == 3 => {
            format!("20{:02X}/{:02X} (Year/Month)", value[0], value[1])
        }

        // Application Effective Date, Transaction Date (YYMMDD)
        [0x5F, 0x25] | [0x9A] if value.len() == 3 => {
            format!("20{:02X}/{:02X}/{:02X} (YY/MM/DD)", value[0], value[1], value[2])
        }

        // Issuer Country Code, Terminal Country Code (ISO 3166-1 numeric)
        [0x5F, 0x28] | [0x9F, 0x1A] if value.len() == 2 => {
            let code = bcd_to_digits(value).parse::<u16>().unwrap_or_default();
            match country_name(code) {
                Some(country) => format!("{} ({})", code, country),
                None => code.to_string(),
            }
        }

        // Currency Codes
        [0x5F, 0x2A] | [0x9F, 0x42] if value.len() == 2 => {
            let code = bcd_to_digits(value).parse::<u16>().unwrap_or_default();
            match currency_name(code) {
                Some(currency) => currency.to_string(),
                None => format!("Currency Code {}", code),
            }
        }

        // Application PAN Sequence Number, CA Public Key Index
        [0x5F, 0x34] | [0x8F] if value.len() == 1 => {
            format!("{:02X} (decimal: {})", value[0], value[0])
        }

        // Counters
        [0x9F, 0x36] | [0x9F, 0x13] | [0x9F, 0x17] => be_uint(value).to_string(),

        // Exponents
        [0x9F, 0x32] | [0x9F, 0x47] if value.len() <= 3 => {
            format!("{} (0x{})", be_uint(value), hex::encode_upper(value))
        }

        // Large binary fields (certificates, signatures)
        [0x90] | [0x92] | [0x93] | [0x9F, 0x46] | [0x9F, 0x48] | [0x9F, 0x4B] if value.len() > 32 => {
            format!("{} ... ({} bytes total)", hex::encode_upper(&value[..32]), value.len())
        }

        // Track 2 Data
        [0x57] | [0x9F, 0x6B] => hex::encode_upper(value).trim_end_matches('F').replace('D', " | "),

        _ => match tags.value_type(tag) {
            ValueType::Text if value.iter().all(|b| b.is_ascii_graphic() || *b == b' ') => {
                String::from_utf8_lossy(value).trim().to_string()
            }
            ValueType::Numeric => bcd_to_digits(value),
            _ => hex::encode_upper(value),
        },
    }
}

/// ISO 3166-1 numeric country codes (subset)
fn country_name(code: u16) -> Option<&'static str> {
    match code {
        124 => Some("Canada"),
        840 => Some("United States"),
        826 => Some("United Kingdom"),
        276 => Some("Germany"),
        250 => Some("France"),
        380 => Some("Italy"),
        724 => Some("Spain"),
        528 => Some("Netherlands"),
        156 => Some("China"),
        392 => Some("Japan"),
        _ => None,
    }
}

/// ISO 4217 numeric currency codes (subset)
fn currency_name(code: u16) -> Option<&'static str> {
    match code {
        124 => Some("CAD (Canadian Dollar)"),
        840 => Some("USD (US Dollar)"),
        978 => Some("EUR (Euro)"),
        826 => Some("GBP (Pound Sterling)"),
        392 => Some("JPY (Japanese Yen)"),
        156 => Some("CNY (Chinese Yuan)"),
        _ => None,
    }
}
