use std::fmt;

use serde::{Deserialize, Serialize};

/// Document information dictionary. Everything is optional; text fields are
/// free-form, dates are parsed from the `D:YYYYMMDDHHmmSSOHH'mm'` form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub keywords: Option<String>,
    pub creation_date: Option<PdfDate>,
    pub modification_date: Option<PdfDate>,
    pub creator: Option<String>,
    pub producer: Option<String>,
}

impl DocumentMetadata {
    pub fn keyword_list(&self) -> Vec<String> {
        self.keywords
            .as_deref()
            .map(|keywords| {
                keywords
                    .split([',', ';'])
                    .map(str::trim)
                    .filter(|keyword| !keyword.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PdfDate {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    /// Offset from UTC in minutes; `None` when the string carries no zone.
    pub utc_offset_minutes: Option<i16>,
}

impl PdfDate {
    /// Parses a PDF date string. Only the year is mandatory; missing fields
    /// take their lowest valid value.
    pub fn parse(raw: &str) -> Option<Self> {
        let text = raw.trim();
        let text = text.strip_prefix("D:").unwrap_or(text);
        let bytes = text.as_bytes();

        let digits = bytes.iter().take_while(|b| b.is_ascii_digit()).count();
        if digits < 4 {
            return None;
        }
        let field = |start: usize, len: usize, default: u16| -> Option<u16> {
            if start + len <= digits {
                text[start..start + len].parse().ok()
            } else {
                Some(default)
            }
        };

        let date = PdfDate {
            year: field(0, 4, 0)?,
            month: field(4, 2, 1)? as u8,
            day: field(6, 2, 1)? as u8,
            hour: field(8, 2, 0)? as u8,
            minute: field(10, 2, 0)? as u8,
            second: field(12, 2, 0)? as u8,
            utc_offset_minutes: parse_offset(&text[digits..]),
        };

        let valid = (1..=12).contains(&date.month)
            && (1..=31).contains(&date.day)
            && date.hour < 24
            && date.minute < 60
            && date.second < 60;
        valid.then_some(date)
    }
}

fn parse_offset(rest: &str) -> Option<i16> {
    let mut chars = rest.chars();
    let sign = match chars.next()? {
        'Z' | 'z' => return Some(0),
        '+' => 1,
        '-' => -1,
        _ => return None,
    };
    let digits: String = chars.filter(|c| c.is_ascii_digit()).collect();
    let hours: i16 = digits.get(0..2)?.parse().ok()?;
    let minutes: i16 = digits.get(2..4).and_then(|m| m.parse().ok()).unwrap_or(0);
    Some(sign * (hours * 60 + minutes))
}

impl fmt::Display for PdfDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )?;
        match self.utc_offset_minutes {
            Some(0) => f.write_str("Z"),
            Some(offset) => {
                let sign = if offset < 0 { '-' } else { '+' };
                let offset = offset.unsigned_abs();
                write!(f, "{}{:02}:{:02}", sign, offset / 60, offset % 60)
            }
            None => Ok(()),
        }
    }
}
