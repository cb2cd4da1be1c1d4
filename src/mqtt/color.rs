use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ColorError {
    #[error("color must have exactly 6 hex digits, got {0:?}")]
    InvalidLength(String),

    #[error("color contains non-hex characters: {0:?}")]
    InvalidDigit(String),
}

/// RGB triple published on the colour control topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    /// Parses `#RRGGBB` (the `#` is optional). Anything else is rejected.
    pub fn from_hex(input: &str) -> Result<Self, ColorError> {
        let hex = input.trim();
        let hex = hex.strip_prefix('#').unwrap_or(hex);

        if hex.len() != 6 {
            return Err(ColorError::InvalidLength(input.to_string()));
        }
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ColorError::InvalidDigit(input.to_string()));
        }

        let component = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&hex[range], 16)
                .map_err(|_| ColorError::InvalidDigit(input.to_string()))
        };

        Ok(Rgb {
            r: component(0..2)?,
            g: component(2..4)?,
            b: component(4..6)?,
        })
    }

    pub fn to_hex(&self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

impl fmt::Display for Rgb {
    /// Wire payload, `r,g,b`.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{},{},{}", self.r, self.g, self.b)
    }
}
