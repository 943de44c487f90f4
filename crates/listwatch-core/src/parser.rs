//! HTML extraction for category result pages and posting detail pages.
//!
//! Pure functions over rendered HTML so the crawl engine stays independent of
//! the browser driver.

use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::error::AppError;
use crate::models::{Attributes, Listing, Location};

/// Result anchors on a category page in list view.
pub const RESULT_LINK_SELECTOR: &str = ".result-data > a.cl-app-anchor";

/// Fragment that switches a category page to list view.
pub const LIST_VIEW_FRAGMENT: &str = "#search=2~list~0";

fn selector(css: &str) -> Result<Selector, AppError> {
    Selector::parse(css).map_err(|e| AppError::ParseError(format!("bad selector '{css}': {e}")))
}

fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn first_text(root: ElementRef<'_>, css: &str) -> Result<Option<String>, AppError> {
    let sel = selector(css)?;
    Ok(root.select(&sel).next().map(text_of))
}

/// Read the total result count a category page reports.
///
/// The count is the last token of the second `.visible-counts` span, e.g.
/// `"1 - 120 of 3,482"` → 3482.
pub fn parse_total_count(html: &str) -> Result<usize, AppError> {
    let document = Html::parse_document(html);
    let sel = selector(".visible-counts > span")?;
    let span = document
        .select(&sel)
        .nth(1)
        .ok_or_else(|| AppError::ParseError("result count not found on category page".into()))?;
    let text = text_of(span);
    let token = text
        .split_whitespace()
        .last()
        .ok_or_else(|| AppError::ParseError("result count is empty".into()))?;
    token
        .replace(',', "")
        .parse()
        .map_err(|e| AppError::ParseError(format!("invalid result count '{token}': {e}")))
}

/// Resolve a result href against the category page URL.
pub fn absolutize(href: &str, base: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    match Url::parse(href) {
        Ok(url) => Some(url.to_string()),
        Err(_) => Url::parse(base)
            .ok()?
            .join(href)
            .ok()
            .map(|u| u.to_string()),
    }
}

fn parse_price(raw: &str) -> Result<f64, AppError> {
    let cleaned = raw.trim().trim_start_matches('$').replace(',', "");
    cleaned
        .parse()
        .map_err(|e| AppError::ParseError(format!("invalid price '{raw}': {e}")))
}

fn parse_attributes(root: ElementRef<'_>) -> Result<Attributes, AppError> {
    let attr_sel = selector(".attrgroup > .attr")?;
    let label_sel = selector(".labl")?;
    let value_sel = selector(".valu")?;

    let mut attributes = Attributes::default();
    for attr in root.select(&attr_sel) {
        let value = attr
            .select(&value_sel)
            .next()
            .map(text_of)
            .unwrap_or_else(|| text_of(attr));
        match attr.select(&label_sel).next() {
            Some(label) => {
                let key = text_of(label).trim_end_matches(':').trim().to_string();
                attributes.insert(key, value);
            }
            None => attributes.other.push(value),
        }
    }
    Ok(attributes)
}

/// Parse a posting detail page into a [`Listing`].
///
/// The id and title are required; every other field is optional or
/// defaults to empty.
pub fn parse_listing(html: &str, url: &str, seen_at: DateTime<Utc>) -> Result<Listing, AppError> {
    let document = Html::parse_document(html);
    let root = document.root_element();

    let info_sel = selector(".postinginfo")?;
    let id = root
        .select(&info_sel)
        .map(text_of)
        .find(|line| line.contains("post id:"))
        .and_then(|line| line.split_whitespace().last().map(str::to_string))
        .ok_or_else(|| AppError::ParseError(format!("post id not found at {url}")))?;

    let title = first_text(root, ".postingtitletext #titletextonly")?
        .ok_or_else(|| AppError::ParseError(format!("title not found at {url}")))?;

    let price = first_text(root, ".price")?
        .filter(|p| !p.is_empty())
        .map(|p| parse_price(&p))
        .transpose()?;

    let span_sel = selector(".postingtitletext > span")?;
    let title_location = root
        .select(&span_sel)
        .nth(2)
        .map(|span| {
            text_of(span)
                .trim_matches(|c: char| c == ' ' || c == '(' || c == ')')
                .to_string()
        })
        .filter(|s| !s.is_empty());

    let description = first_text(root, "#postingbody")?.unwrap_or_default();

    let location = Location {
        area: first_text(root, ".crumb.area > p > a")?,
        subarea: first_text(root, ".crumb.subarea > p > a")?,
    };

    let time_sel = selector("#display-date.postinginfo > time")?;
    let posted = root.select(&time_sel).next().and_then(|time| {
        time.value()
            .attr("title")
            .or_else(|| time.value().attr("datetime"))
            .map(str::to_string)
    });

    Ok(Listing {
        id,
        url: url.to_string(),
        title,
        price,
        title_location,
        description,
        location,
        posted,
        attributes: parse_attributes(root)?,
        last_seen: seen_at,
        sold: false,
    })
}
