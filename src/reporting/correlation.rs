//! Correlation of a violation with the targeted form
//!
//! Review forms live at `/<base>/<product id>?button=<button id>`, so the referer of
//! an offending request says which product and button were being flooded. Any
//! parse failure yields `0` for the affected id.

use serde::Serialize;
use url::Url;

/// Business entity targeted by a request, `0` when unknown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReportTarget {
    pub product_id: i64,
    pub button_id: i64,
}

pub fn extract_target(referer: Option<&str>) -> ReportTarget {
    let Some(url) = referer.and_then(|r| Url::parse(r.trim()).ok()) else {
        return ReportTarget::default();
    };

    let product_id = url
        .path_segments()
        .and_then(|mut segments| segments.nth(1))
        .map(parse_id)
        .unwrap_or(0);

    let button_id = url
        .query_pairs()
        .find(|(key, _)| key == "button")
        .map(|(_, value)| parse_id(&value))
        .unwrap_or(0);

    ReportTarget {
        product_id,
        button_id,
    }
}

fn parse_id(raw: &str) -> i64 {
    raw.trim().parse::<i64>().ok().filter(|id| *id >= 0).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_and_button_are_extracted() {
        let target = extract_target(Some("https://jdma.example.fr/Demarches/1234?button=56&iframe=true"));
        assert_eq!(
            target,
            ReportTarget {
                product_id: 1234,
                button_id: 56
            }
        );
    }

    #[test]
    fn test_missing_button_defaults_to_zero() {
        let target = extract_target(Some("https://jdma.example.fr/Demarches/1234"));
        assert_eq!(target.product_id, 1234);
        assert_eq!(target.button_id, 0);
    }

    #[test]
    fn test_absent_or_malformed_referer_defaults_to_zero() {
        assert_eq!(extract_target(None), ReportTarget::default());
        assert_eq!(extract_target(Some("not a url")), ReportTarget::default());
        assert_eq!(extract_target(Some("")), ReportTarget::default());
    }

    #[test]
    fn test_non_numeric_segments_default_to_zero() {
        let target = extract_target(Some("https://jdma.example.fr/Demarches/avis?button=abc"));
        assert_eq!(target, ReportTarget::default());

        let short = extract_target(Some("https://jdma.example.fr/1234?button=7"));
        assert_eq!(short.product_id, 0);
        assert_eq!(short.button_id, 7);
    }
}
