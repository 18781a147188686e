/// Normalize a display name into a URL slug: lowercase ASCII letters, digits
/// and single hyphens, no leading or trailing hyphen.
///
/// Apostrophes become word separators ("Villeneuve-d'Ascq" → "villeneuve-d-ascq").
pub fn slugify(input: &str) -> String {
    let ascii = deunicode::deunicode(&input.to_lowercase()).to_lowercase();

    let mut slug = String::with_capacity(ascii.len());
    let mut pending_sep = false;
    for c in ascii.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('-');
            }
            pending_sep = false;
            slug.push(c);
        } else {
            pending_sep = true;
        }
    }
    slug
}
