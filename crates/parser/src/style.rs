use scraper::node::Element;

const NON_RENDERED: &[&str] = &[
    "head", "script", "style", "template", "noscript", "meta", "link", "title", "base",
];

const INLINE: &[&str] = &[
    "a", "abbr", "b", "bdi", "bdo", "br", "button", "cite", "code", "em", "i", "img", "input", "kbd", "label",
    "mark", "q", "s", "samp", "select", "small", "span", "strong", "sub", "sup", "textarea", "time", "u", "var",
];

/// `backgroundColor` and `background-color` both become `background-color`.
pub(crate) fn kebab(property: &str) -> String {
    let mut out = String::with_capacity(property.len() + 4);
    for c in property.chars() {
        if c.is_ascii_uppercase() {
            out.push('-');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

fn inline(element: &Element, property: &str) -> Option<String> {
    let style = element.attr("style")?;
    style.split(';').rev().find_map(|declaration| {
        let (name, value) = declaration.split_once(':')?;
        if name.trim().eq_ignore_ascii_case(property) {
            Some(value.trim().trim_end_matches("!important").trim().to_string())
        } else {
            None
        }
    })
}

pub(crate) fn computed(element: &Element, property: &str) -> String {
    let property = kebab(property);
    if let Some(value) = inline(element, &property) {
        return value;
    }

    match property.as_str() {
        "display" if element.attr("hidden").is_some() || NON_RENDERED.contains(&element.name()) => "none".into(),
        "display" if INLINE.contains(&element.name()) => "inline".into(),
        "display" => "block".into(),
        "visibility" => "visible".into(),
        "opacity" => "1".into(),
        "position" => "static".into(),
        _ => String::new(),
    }
}

/// Whether the element itself generates a box. Ancestors are checked by the caller.
pub(crate) fn renders(element: &Element) -> bool {
    if element.name() == "input" && element.attr("type").is_some_and(|t| t.eq_ignore_ascii_case("hidden")) {
        return false;
    }
    computed(element, "display") != "none"
}
