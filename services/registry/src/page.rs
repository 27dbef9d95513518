//! Tag and catalog listings.

use std::collections::BTreeSet;

use crate::name::{RepoName, Tag};

/// Sort and deduplicate `items`, keep those strictly after `from`, and take at most `limit`.
pub fn paginate<T, I>(items: I, from: Option<&T>, limit: Option<usize>) -> Vec<T>
where
    T: Ord,
    I: IntoIterator<Item = T>,
{
    let sorted: BTreeSet<T> = items.into_iter().collect();
    let after = sorted
        .into_iter()
        .filter(|item| from.is_none_or(|from| item > from));

    match limit {
        Some(limit) => after.take(limit).collect(),
        None => after.collect(),
    }
}

/// Tags of one repository, as returned by `GET /v2/<name>/tags/list`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Tags {
    /// Repository name.
    pub name: RepoName,

    /// Tag names, sorted.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub tags: Vec<Tag>,
}

impl Tags {
    /// A page of `tags`.
    pub fn page<I>(name: RepoName, tags: I, from: Option<&Tag>, limit: Option<usize>) -> Self
    where
        I: IntoIterator<Item = Tag>,
    {
        Self {
            name,
            tags: paginate(tags, from, limit),
        }
    }

    /// JSON document.
    pub fn json(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "tags": self.tags,
        })
    }
}

/// Repositories hosted by a registry, as returned by `GET /v2/_catalog`.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Catalog {
    /// Repository names, sorted.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub repositories: Vec<RepoName>,
}

impl Catalog {
    /// A page of `repositories`.
    pub fn page<I>(repositories: I, from: Option<&RepoName>, limit: Option<usize>) -> Self
    where
        I: IntoIterator<Item = RepoName>,
    {
        Self {
            repositories: paginate(repositories, from, limit),
        }
    }

    /// JSON document.
    pub fn json(&self) -> serde_json::Value {
        serde_json::json!({ "repositories": self.repositories })
    }
}

// Registries answer `"tags": null` for a repository without tags.
fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: serde::Deserialize<'de>,
{
    use serde::Deserialize as _;
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(names: &[&str]) -> Vec<Tag> {
        names.iter().map(|name| name.parse().unwrap()).collect()
    }

    #[test]
    fn tag_pagination() {
        let all = tags(&["latest", "1.0", "0.1-rc", "0.1", "1.0"]);
        let page = |from: Option<&str>, limit| {
            let from: Option<Tag> = from.map(|from| from.parse().unwrap());
            paginate(all.clone(), from.as_ref(), limit)
        };

        assert_eq!(page(None, None), tags(&["0.1", "0.1-rc", "1.0", "latest"]));
        assert_eq!(page(Some("0.1-rc"), None), tags(&["1.0", "latest"]));
        assert_eq!(page(Some("xyz"), None), tags(&[]));
        assert_eq!(page(None, Some(2)), tags(&["0.1", "0.1-rc"]));
        assert_eq!(page(Some("0.1"), Some(2)), tags(&["0.1-rc", "1.0"]));
        assert_eq!(page(None, Some(0)), tags(&[]));
    }

    #[test]
    fn tags_document() {
        let page = Tags::page(
            "my-alpine".parse().unwrap(),
            tags(&["two", "one", "three"]),
            None,
            None,
        );
        assert_eq!(
            page.json().to_string(),
            r#"{"name":"my-alpine","tags":["one","three","two"]}"#
        );

        let parsed: Tags = serde_json::from_str(r#"{"name":"a","tags":null}"#).unwrap();
        assert!(parsed.tags.is_empty());
    }

    #[test]
    fn catalog_document() {
        let repos = ["b", "a/x", "a"].map(|name| name.parse::<RepoName>().unwrap());
        let from = "a".parse().unwrap();
        let catalog = Catalog::page(repos, Some(&from), Some(5));
        assert_eq!(
            catalog.json().to_string(),
            r#"{"repositories":["a/x","b"]}"#
        );
    }
}

#[cfg(test)]
mod proptests {
    use proptest::prelude::*;

    use super::*;

    fn tag_names() -> impl Strategy<Value = Vec<Tag>> {
        prop::collection::vec("[a-zA-Z0-9_][a-zA-Z0-9._-]{0,8}", 0..40).prop_map(|names| {
            names
                .into_iter()
                .map(|name| name.parse::<Tag>().unwrap())
                .collect()
        })
    }

    proptest! {
        /// Following `last` from page to page visits every tag once, in order.
        #[test]
        fn pages_cover_the_listing(tags in tag_names(), n in 1usize..8) {
            let name: RepoName = "foo".parse().unwrap();
            let full = Tags::page(name.clone(), tags.clone(), None, None).tags;

            let mut walked = Vec::new();
            let mut last: Option<Tag> = None;
            loop {
                let page = Tags::page(name.clone(), tags.clone(), last.as_ref(), Some(n)).tags;
                prop_assert!(page.len() <= n);
                let Some(end) = page.last().cloned() else {
                    break;
                };
                walked.extend(page);
                last = Some(end);
            }

            prop_assert_eq!(&walked, &full);
            prop_assert!(walked.windows(2).all(|pair| pair[0] < pair[1]));
        }

        /// A page starts strictly after `last`, present in the listing or not.
        #[test]
        fn page_starts_after_last(
            tags in tag_names(),
            last in "[a-zA-Z0-9_][a-zA-Z0-9._-]{0,8}",
            n in prop::option::of(0usize..8),
        ) {
            let last: Tag = last.parse().unwrap();
            let page = paginate(tags.clone(), Some(&last), n);

            let mut expected: Vec<Tag> = tags.into_iter().filter(|tag| *tag > last).collect();
            expected.sort();
            expected.dedup();
            if let Some(n) = n {
                expected.truncate(n);
            }
            prop_assert_eq!(page, expected);
        }
    }
}
