//! Parsing of HTML directory listings
//!
//! Apache, nginx and object-store front ends all render a listing as a page
//! of anchors; only the `href` values matter here.

use crate::error::HostError;
use cnpj_common::types::Period;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::BTreeSet;

fn hrefs(html: &str) -> Result<Vec<String>, HostError> {
    let document = Html::parse_document(html);
    let anchors = Selector::parse("a[href]").map_err(|e| HostError::Listing(e.to_string()))?;

    Ok(document
        .select(&anchors)
        .filter_map(|a| a.value().attr("href"))
        .map(last_segment)
        .filter(|s| !s.is_empty())
        .collect())
}

/// Final path segment of an href, without query string or trailing slash.
fn last_segment(href: &str) -> String {
    let path = href.split(['?', '#']).next().unwrap_or(href);
    let path = path.trim_end_matches('/');
    path.rsplit('/').next().unwrap_or(path).to_string()
}

/// Period directories (`YYYY-MM/`) in ascending order, deduplicated.
pub fn parse_periods(html: &str) -> Result<Vec<Period>, HostError> {
    let pattern = Regex::new(r"^\d{4}-\d{2}$").map_err(|e| HostError::Listing(e.to_string()))?;

    let periods: BTreeSet<Period> = hrefs(html)?
        .iter()
        .filter(|segment| pattern.is_match(segment))
        .filter_map(|segment| segment.parse().ok())
        .collect();

    Ok(periods.into_iter().collect())
}

/// Zip archive names, sorted and deduplicated.
pub fn parse_archives(html: &str) -> Result<Vec<String>, HostError> {
    let names: BTreeSet<String> = hrefs(html)?
        .into_iter()
        .filter(|segment| segment.to_lowercase().ends_with(".zip"))
        .collect();

    Ok(names.into_iter().collect())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const ROOT_LISTING: &str = r#"
        <html><head><title>Index of /dados/cnpj/dados_abertos_cnpj</title></head>
        <body><h1>Index of /dados/cnpj/dados_abertos_cnpj</h1>
        <table>
          <tr><td><a href="?C=N;O=D">Name</a></td></tr>
          <tr><td><a href="/dados/cnpj/">Parent Directory</a></td></tr>
          <tr><td><a href="2024-02/">2024-02/</a></td><td>2024-02-12 10:01</td></tr>
          <tr><td><a href="2023-12/">2023-12/</a></td><td>2023-12-15 09:12</td></tr>
          <tr><td><a href="/dados/cnpj/dados_abertos_cnpj/2024-03/">2024-03/</a></td></tr>
          <tr><td><a href="2024-03/">2024-03/</a></td></tr>
          <tr><td><a href="temp/">temp/</a></td></tr>
          <tr><td><a href="2024-13/">bogus</a></td></tr>
        </table></body></html>
    "#;

    #[test]
    fn test_parse_periods_sorted_and_deduplicated() {
        let periods = parse_periods(ROOT_LISTING).unwrap();
        let rendered: Vec<String> = periods.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["2023-12", "2024-02", "2024-03"]);
    }

    #[test]
    fn test_parse_archives() {
        let html = r#"
            <a href="../">Parent</a>
            <a href="Socios0.zip">Socios0.zip</a>
            <a href="Cnaes.zip">Cnaes.zip</a>
            <a href="https://mirror.example/2024-03/Empresas0.ZIP">Empresas0.ZIP</a>
            <a href="LAYOUT_DADOS_ABERTOS_CNPJ.pdf">layout</a>
            <a href="Cnaes.zip">Cnaes.zip</a>
        "#;
        let names = parse_archives(html).unwrap();
        assert_eq!(names, vec!["Cnaes.zip", "Empresas0.ZIP", "Socios0.zip"]);
    }

    #[test]
    fn test_listing_without_links() {
        assert!(parse_periods("<html><body>maintenance</body></html>").unwrap().is_empty());
        assert!(parse_archives("").unwrap().is_empty());
    }
}
