pub mod number;
pub mod patterns;

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};

use number::parse_price;
use patterns::{Category, LOCAL_PRICE_RE};

/// Prices per m² found on a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Prices {
    pub appart: Option<i64>,
    pub maison: Option<i64>,
}

impl Prices {
    fn get(&self, category: Category) -> Option<i64> {
        match category {
            Category::Apartment => self.appart,
            Category::House => self.maison,
        }
    }

    fn set(&mut self, category: Category, value: Option<i64>) {
        match category {
            Category::Apartment => self.appart = value,
            Category::House => self.maison = value,
        }
    }

    fn complete(&self) -> bool {
        self.appart.is_some() && self.maison.is_some()
    }
}

const HIDDEN_TAGS: &[&str] = &["script", "style", "noscript", "template"];

static BODY: LazyLock<Selector> = LazyLock::new(|| Selector::parse("body").unwrap());
static ANY_ELEMENT: LazyLock<Selector> = LazyLock::new(|| Selector::parse("*").unwrap());

/// Two passes: pattern cascades over the whole body text, then a per-element scan
/// for whichever category is still missing.
pub fn extract_prices(html: &str) -> Prices {
    let document = Html::parse_document(html);

    let body_text = document
        .select(&BODY)
        .next()
        .map(visible_text)
        .unwrap_or_default();

    let mut prices = Prices::default();
    for category in Category::ALL {
        prices.set(category, match_cascade(category, &body_text));
    }

    if !prices.complete() {
        scan_elements(&document, &mut prices);
    }
    prices
}

/// First pattern in the category's cascade that yields a non-zero price.
fn match_cascade(category: Category, text: &str) -> Option<i64> {
    category.patterns().iter().find_map(|p| {
        let caps = p.re.captures(text)?;
        nonzero_price(caps.get(p.group)?.as_str())
    })
}

/// A zero price is a placeholder, not a figure.
fn nonzero_price(raw: &str) -> Option<i64> {
    parse_price(raw).filter(|v| *v != 0)
}

fn scan_elements(document: &Html, prices: &mut Prices) {
    for element in document.select(&ANY_ELEMENT) {
        if HIDDEN_TAGS.contains(&element.value().name()) {
            continue;
        }
        let text = visible_text(element);
        for category in Category::ALL {
            if prices.get(category).is_some() || !category.mentioned_in(&text) {
                continue;
            }
            let value = LOCAL_PRICE_RE
                .captures(&text)
                .and_then(|c| nonzero_price(c.get(1)?.as_str()));
            prices.set(category, value);
        }
        if prices.complete() {
            break;
        }
    }
}

/// Concatenated text of an element, skipping script-like children, with
/// whitespace runs collapsed to single spaces.
fn visible_text(element: ElementRef) -> String {
    let mut raw = String::new();
    for node in element.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| HIDDEN_TAGS.contains(&e.name()))
        });
        if !hidden {
            raw.push_str(text);
        }
    }
    collapse_whitespace(&raw)
}

fn collapse_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_space = false;
    for c in s.chars() {
        if c.is_whitespace() {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(c);
            in_space = false;
        }
    }
    out
}
