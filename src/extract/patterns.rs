use std::sync::LazyLock;

use regex::Regex;

/// Property type a price is extracted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Apartment,
    House,
}

/// A pattern and the capture group holding the number.
pub struct PricePattern {
    pub re: Regex,
    pub group: usize,
}

const NUMBER_RUN: &str = r"([0-9\x{202F}\x{00A0}\s.,]{3,})";
const PER_AREA: &str = r"\s*€\s*/\s*(?:m²|m2)";

fn tight(keyword: &str) -> PricePattern {
    PricePattern {
        re: Regex::new(&format!(
            r"(?i)({})[^0-9]{{0,40}}{}{}",
            keyword, NUMBER_RUN, PER_AREA
        ))
        .unwrap(),
        group: 2,
    }
}

fn loose(keyword: &str) -> PricePattern {
    PricePattern {
        re: Regex::new(&format!(
            r"(?i)(prix|moyen|m²)[^.]{{0,120}}({})[^0-9]{{0,40}}{}",
            keyword, NUMBER_RUN
        ))
        .unwrap(),
        group: 3,
    }
}

static APARTMENT_PATTERNS: LazyLock<Vec<PricePattern>> =
    LazyLock::new(|| vec![tight("appartements?"), loose("appartements?")]);

static HOUSE_PATTERNS: LazyLock<Vec<PricePattern>> =
    LazyLock::new(|| vec![tight("maisons?"), loose("maisons?")]);

static APARTMENT_KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)appartement").unwrap());
static HOUSE_KEYWORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)maison").unwrap());

/// A bare "<number> €/m²" fragment, used when scanning single elements.
pub static LOCAL_PRICE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!("(?i){}{}", NUMBER_RUN, PER_AREA)).unwrap());

impl Category {
    pub const ALL: [Category; 2] = [Category::Apartment, Category::House];

    /// Ordered cascade; the first pattern yielding a number wins.
    pub fn patterns(self) -> &'static [PricePattern] {
        match self {
            Category::Apartment => &APARTMENT_PATTERNS,
            Category::House => &HOUSE_PATTERNS,
        }
    }

    pub fn mentioned_in(self, text: &str) -> bool {
        match self {
            Category::Apartment => APARTMENT_KEYWORD.is_match(text),
            Category::House => HOUSE_KEYWORD.is_match(text),
        }
    }
}
