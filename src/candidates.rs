use crate::model::LocationSlugs;

/// Guess price-page URLs for a location, most specific first.
///
/// Templates whose slugs are missing are skipped; the city-only page is always last.
pub fn build_candidates(base: &str, slugs: &LocationSlugs) -> Vec<String> {
    let city = &slugs.city;
    let region = slugs.region.as_deref();
    let dept = slugs.department.as_deref();
    let postal = slugs.postal.as_deref();

    let mut urls = Vec::with_capacity(5);
    if let (Some(region), Some(dept), Some(cp)) = (region, dept, postal) {
        urls.push(format!("{}{}/{}/{}-{}/", base, region, dept, city, cp));
    }
    if let (Some(region), Some(dept)) = (region, dept) {
        urls.push(format!("{}{}/{}/{}/", base, region, dept, city));
    }
    if let (Some(dept), Some(cp)) = (dept, postal) {
        urls.push(format!("{}{}/{}-{}/", base, dept, city, cp));
    }
    if let Some(cp) = postal {
        urls.push(format!("{}{}-{}/", base, city, cp));
    }
    urls.push(format!("{}{}.htm", base, city));
    urls
}
