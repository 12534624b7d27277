//! Destination planning from a document name.
//!
//! Names start with `yymmdd` followed by a four character form id, e.g.
//! `240115FRM1JD.pdf` files under `FRM1/2024-01/`. The day is validated but
//! does not take part in the destination.

use std::path::{Path, PathBuf};

/// Characters of the name that carry structure.
const PLANNED_PREFIX_LEN: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub form_id: String,
    /// `YYYY-MM`
    pub year_month: String,
}

impl Plan {
    /// `<root>/<form_id>/<year_month>`
    pub fn directory(&self, root: &Path) -> PathBuf {
        root.join(&self.form_id).join(&self.year_month)
    }
}

/// Parse `filename` into a plan, or `None` if it does not carry one.
pub fn plan(filename: &str) -> Option<Plan> {
    // Byte slicing below is safe only over ASCII.
    let prefix = filename.get(..PLANNED_PREFIX_LEN)?;
    if !prefix.is_ascii() {
        return None;
    }

    two_digits(&prefix[0..2])?;
    let mm = two_digits(&prefix[2..4])?;
    let dd = two_digits(&prefix[4..6])?;
    let form_id = &prefix[6..10];

    if !(1..=12).contains(&mm) || !(1..=31).contains(&dd) {
        return None;
    }
    if !form_id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }

    Some(Plan {
        form_id: form_id.to_string(),
        year_month: format!("20{}-{}", &prefix[0..2], &prefix[2..4]),
    })
}

fn two_digits(s: &str) -> Option<u8> {
    if s.len() == 2 && s.bytes().all(|b| b.is_ascii_digit()) {
        s.parse().ok()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_token() {
        let plan = plan("240115FRM1JD.pdf").unwrap();
        assert_eq!(plan.form_id, "FRM1");
        assert_eq!(plan.year_month, "2024-01");
        assert_eq!(
            plan.directory(Path::new("/root")),
            PathBuf::from("/root/FRM1/2024-01")
        );
    }

    #[test]
    fn test_exactly_ten_characters() {
        let plan = plan("991231ABCD").unwrap();
        assert_eq!(plan.form_id, "ABCD");
        assert_eq!(plan.year_month, "2099-12");
    }

    #[test]
    fn test_plan_is_deterministic() {
        for name in ["240115FRM1JD.pdf", "230701XY12", "010203ZZZZ-rest"] {
            assert_eq!(plan(name), plan(name));
        }
    }

    #[test]
    fn test_short_names_never_plan() {
        for len in 0..PLANNED_PREFIX_LEN {
            let name = &"2401150000"[..len];
            assert!(plan(name).is_none(), "{name:?} should not plan");
        }
    }

    #[test]
    fn test_malformed_names() {
        assert!(plan("scan_0001.pdf").is_none());
        assert!(plan("2413XXFRM1.pdf").is_none());
        assert!(plan("241315FRM1.pdf").is_none(), "month 13");
        assert!(plan("240015FRM1.pdf").is_none(), "month 00");
        assert!(plan("240100FRM1.pdf").is_none(), "day 00");
        assert!(plan("240115FR/1.pdf").is_none(), "separator in form id");
        assert!(plan("240115FR.pdf").is_none());
    }

    #[test]
    fn test_non_ascii_does_not_panic() {
        assert!(plan("2401é5FRM1JD").is_none());
        assert!(plan("240115FRMé").is_none());
        assert!(plan("日本語のファイル名です").is_none());
    }
}
