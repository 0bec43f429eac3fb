//! coord.rs – адреса ячеек: буквы столбцов, "C3", диапазоны, сдвиг ссылок при вставке столбцов.
//!
//! Столбцы внутри крейта 0-based, строки 1-based (как в самом XML).

use anyhow::{Context, Result, bail};
use regex::{Captures, Regex};
use std::fmt;
use std::sync::LazyLock;

static CELL_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\$?)([A-Za-z]{1,3})(\$?)([0-9]+)").expect("static cell-ref regex")
});

/// Столбцов на листе (A..XFD).
pub const MAX_COLUMNS: u32 = 16_384;

/// 0 -> "A", 25 -> "Z", 26 -> "AA".
pub fn col_letter(mut n: u32) -> String {
    let mut s = String::new();
    loop {
        s.insert(0, (b'A' + (n % 26) as u8) as char);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    s
}

/// "A" -> 0, "AA" -> 26. Дальше XFD не пускает.
pub fn col_index(s: &str) -> Result<u32> {
    if s.is_empty() || s.len() > 3 || !s.bytes().all(|b| b.is_ascii_alphabetic()) {
        bail!("invalid column letters: {s:?}");
    }
    let n = s
        .bytes()
        .fold(0u32, |acc, b| acc * 26 + (b.to_ascii_uppercase() - b'A' + 1) as u32);
    if n > MAX_COLUMNS {
        bail!("column {s:?} is past XFD");
    }
    Ok(n - 1)
}

/// "C3" -> (2, 3)
pub fn split_coord(coord: &str) -> Result<(u32, u32)> {
    let p = coord
        .find(|c: char| c.is_ascii_digit())
        .with_context(|| format!("invalid cell coordinate {coord:?} – no digits found"))?;
    let col = col_index(&coord[..p])?;
    let row: u32 = coord[p..]
        .parse()
        .with_context(|| format!("invalid row number in cell coordinate {coord:?}"))?;
    if row == 0 {
        bail!("row numbers start at 1: {coord:?}");
    }
    Ok((col, row))
}

pub fn coord(col: u32, row: u32) -> String {
    format!("{}{}", col_letter(col), row)
}

/// Прямоугольник ячеек, границы включительно.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRange {
    pub c0: u32,
    pub r0: u32,
    pub c1: u32,
    pub r1: u32,
}

impl CellRange {
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.replace('$', "");
        match s.split_once(':') {
            Some((a, b)) => {
                let (c0, r0) = split_coord(a)?;
                let (c1, r1) = split_coord(b)?;
                Ok(Self {
                    c0: c0.min(c1),
                    r0: r0.min(r1),
                    c1: c0.max(c1),
                    r1: r0.max(r1),
                })
            }
            None => {
                let (c, r) = split_coord(&s)?;
                Ok(Self { c0: c, r0: r, c1: c, r1: r })
            }
        }
    }

    pub fn contains(&self, col: u32, row: u32) -> bool {
        (self.c0..=self.c1).contains(&col) && (self.r0..=self.r1).contains(&row)
    }

    /// Левая верхняя ячейка.
    pub fn anchor(&self) -> (u32, u32) {
        (self.c0, self.r0)
    }
}

impl fmt::Display for CellRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.c0 == self.c1 && self.r0 == self.r1 {
            write!(f, "{}", coord(self.c0, self.r0))
        } else {
            write!(f, "{}:{}", coord(self.c0, self.r0), coord(self.c1, self.r1))
        }
    }
}

/// Сдвигает все ссылки вида `B7`, `$B$7`, `A1:C9`, `A1 B2:C3` вправо на `by`
/// столбцов, если столбец ссылки >= `at`.
pub fn shift_refs(refs: &str, at: u32, by: u32) -> String {
    CELL_REF
        .replace_all(refs, |caps: &Captures| {
            let letters = &caps[2];
            match col_index(letters) {
                Ok(c) if c >= at => {
                    format!("{}{}{}{}", &caps[1], col_letter(c + by), &caps[3], &caps[4])
                }
                _ => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Применяет `shift_refs` к значениям атрибутов-ссылок внутри куска XML
/// (`ref`, `sqref`, `activeCell`, `topLeftCell`).
pub fn shift_ref_attributes(xml: &[u8], at: u32, by: u32) -> Result<Vec<u8>> {
    static ATTR: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#"\b(ref|sqref|activeCell|topLeftCell)="([^"]*)""#)
            .expect("static ref-attr regex")
    });
    let text = std::str::from_utf8(xml).context("sheet XML is not UTF-8")?;
    let out = ATTR.replace_all(text, |caps: &Captures| {
        format!(r#"{}="{}""#, &caps[1], shift_refs(&caps[2], at, by))
    });
    Ok(out.into_owned().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letters_round_trip_on_boundaries() -> Result<()> {
        assert_eq!(col_letter(0), "A");
        assert_eq!(col_letter(25), "Z");
        assert_eq!(col_letter(26), "AA");
        assert_eq!(col_letter(701), "ZZ");
        assert_eq!(col_index("L")?, 11);
        assert_eq!(col_index("aa")?, 26);
        assert!(col_index("").is_err());
        assert!(col_index("A1").is_err());
        assert_eq!(col_index("XFD")?, MAX_COLUMNS - 1);
        assert!(col_index("XFE").is_err());
        assert!(col_index("ZZZ").is_err());
        assert!(col_index("AAAAAAAA").is_err());
        assert!(split_coord("AAAAAAAA1").is_err());
        Ok(())
    }

    #[test]
    fn split_coord_rejects_garbage() {
        assert_eq!(split_coord("C3").unwrap(), (2, 3));
        assert!(split_coord("C").is_err());
        assert!(split_coord("3").is_err());
        assert!(split_coord("C0").is_err());
    }

    #[test]
    fn range_parse_and_contains() -> Result<()> {
        let r = CellRange::parse("$K$1:L4")?;
        assert_eq!(r, CellRange { c0: 10, r0: 1, c1: 11, r1: 4 });
        assert!(r.contains(11, 2));
        assert!(!r.contains(12, 2));
        assert_eq!(r.anchor(), (10, 1));
        assert_eq!(r.to_string(), "K1:L4");
        assert_eq!(CellRange::parse("B2")?.to_string(), "B2");
        Ok(())
    }

    #[test]
    fn shift_refs_moves_only_columns_at_or_after_point() {
        assert_eq!(shift_refs("A1:C9", 0, 1), "B1:D9");
        assert_eq!(shift_refs("$A$1 B2:C3", 1, 1), "$A$1 C2:D3");
        assert_eq!(shift_refs("Z5", 0, 2), "AB5");
    }

    #[test]
    fn shift_ref_attributes_touches_only_reference_attributes() -> Result<()> {
        let xml = br#"<dimension ref="A1:K20"/><selection activeCell="C3" sqref="C3"/><col min="1" max="2"/>"#;
        let out = shift_ref_attributes(xml, 0, 1)?;
        assert_eq!(
            std::str::from_utf8(&out)?,
            r#"<dimension ref="B1:L20"/><selection activeCell="D3" sqref="D3"/><col min="1" max="2"/>"#
        );
        Ok(())
    }
}
