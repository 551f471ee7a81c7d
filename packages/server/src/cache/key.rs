//! Deterministic URL-form cache fingerprints: a resource prefix plus
//! sorted, URL-encoded query parameters. Identical parameter sets produce
//! identical keys regardless of the order callers built them in; `None`
//! parameters are omitted entirely rather than serialized as empty.

/// Build a fingerprint from a resource prefix and a set of `(name, value)`
/// pairs. Pairs whose value is `None` are dropped before sorting, so two
/// calls with the same present parameters in different orders collide.
pub fn fingerprint(resource_prefix: &str, params: &[(&str, Option<String>)]) -> String {
    let mut present: Vec<(&str, String)> = params
        .iter()
        .filter_map(|(name, value)| value.clone().map(|v| (*name, v)))
        .collect();
    present.sort_by_key(|(name, _)| *name);

    if present.is_empty() {
        return resource_prefix.to_string();
    }

    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (name, value) in &present {
        serializer.append_pair(name, value);
    }

    format!("{resource_prefix}?{}", serializer.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_independent_of_parameter_order() {
        let a = fingerprint(
            "products",
            &[("categoryId", Some("C".into())), ("sort", Some("price_asc".into()))],
        );
        let b = fingerprint(
            "products",
            &[("sort", Some("price_asc".into())), ("categoryId", Some("C".into()))],
        );
        assert_eq!(a, b);
    }

    #[test]
    fn omits_none_parameters() {
        let key = fingerprint("categories", &[("navId", Some("N".into())), ("parentId", None)]);
        assert_eq!(key, "categories?navId=N");
    }

    #[test]
    fn bare_prefix_when_no_params_present() {
        assert_eq!(fingerprint("navigation", &[]), "navigation");
    }

    #[test]
    fn url_encodes_values() {
        let key = fingerprint("categories", &[("title", Some("phones & tablets".into()))]);
        assert_eq!(key, "categories?title=phones+%26+tablets");
    }
}
