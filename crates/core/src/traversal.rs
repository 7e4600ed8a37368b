//! Traversal paths select which level of the document tree a stage works on.
//!
//! `@r` is the root documents, `@c` their chunks, `@cc` the chunks of those
//! chunks and `@m` the matches. Comma separated selectors (`@r,c`) are visited
//! one after the other.

use crate::error::FlowError;
use crate::models::Document;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Chunks,
    Matches,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TraversalPaths {
    raw: String,
    selectors: Vec<Vec<Step>>,
}

impl TraversalPaths {
    pub fn root() -> Self {
        Self {
            raw: "@r".to_string(),
            selectors: vec![Vec::new()],
        }
    }

    pub fn chunks() -> Self {
        Self {
            raw: "@c".to_string(),
            selectors: vec![vec![Step::Chunks]],
        }
    }

    /// `@r,c`: roots first, then their chunks.
    pub fn root_and_chunks() -> Self {
        Self {
            raw: "@r,c".to_string(),
            selectors: vec![Vec::new(), vec![Step::Chunks]],
        }
    }

    /// Visits every selected document, selector by selector.
    pub fn apply_mut<F>(&self, docs: &mut [Document], mut visit: F)
    where
        F: FnMut(&mut Document),
    {
        for selector in &self.selectors {
            for doc in select_mut(docs, selector) {
                visit(doc);
            }
        }
    }

    /// Like `apply_mut`, but hands over each selector's documents at once so
    /// callers can batch work across them.
    pub fn apply_batched_mut<F>(&self, docs: &mut [Document], mut visit: F)
    where
        F: FnMut(Vec<&mut Document>),
    {
        for selector in &self.selectors {
            visit(select_mut(docs, selector));
        }
    }

    pub fn select<'a>(&self, docs: &'a [Document]) -> Vec<&'a Document> {
        let mut selected = Vec::new();
        for selector in &self.selectors {
            select_into(docs, selector, &mut selected);
        }
        selected
    }
}

fn select_mut<'a>(docs: &'a mut [Document], steps: &[Step]) -> Vec<&'a mut Document> {
    match steps.split_first() {
        None => docs.iter_mut().collect(),
        Some((Step::Chunks, rest)) => docs
            .iter_mut()
            .flat_map(|doc| select_mut(&mut doc.chunks, rest))
            .collect(),
        Some((Step::Matches, rest)) => docs
            .iter_mut()
            .flat_map(|doc| select_mut(&mut doc.matches, rest))
            .collect(),
    }
}

fn select_into<'a>(docs: &'a [Document], steps: &[Step], out: &mut Vec<&'a Document>) {
    match steps.split_first() {
        None => out.extend(docs.iter()),
        Some((Step::Chunks, rest)) => {
            for doc in docs {
                select_into(&doc.chunks, rest, out);
            }
        }
        Some((Step::Matches, rest)) => {
            for doc in docs {
                select_into(&doc.matches, rest, out);
            }
        }
    }
}

impl FromStr for TraversalPaths {
    type Err = FlowError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| FlowError::InvalidTraversal {
            path: raw.to_string(),
            reason: reason.to_string(),
        };

        let body = raw
            .trim()
            .strip_prefix('@')
            .ok_or_else(|| invalid("paths start with '@'"))?;

        let mut selectors = Vec::new();
        for selector in body.split(',') {
            let selector = selector.trim();
            if selector.is_empty() {
                return Err(invalid("empty selector"));
            }
            if selector == "r" {
                selectors.push(Vec::new());
                continue;
            }

            let steps = selector
                .chars()
                .map(|step| match step {
                    'c' => Ok(Step::Chunks),
                    'm' => Ok(Step::Matches),
                    'r' => Err(invalid("'r' must stand alone")),
                    _ => Err(invalid("selectors are built from 'r', 'c' and 'm'")),
                })
                .collect::<Result<Vec<_>, _>>()?;
            selectors.push(steps);
        }

        Ok(Self {
            raw: raw.trim().to_string(),
            selectors,
        })
    }
}

impl TryFrom<String> for TraversalPaths {
    type Error = FlowError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TraversalPaths> for String {
    fn from(value: TraversalPaths) -> Self {
        value.raw
    }
}

impl fmt::Display for TraversalPaths {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> Vec<Document> {
        let mut root = Document::from_text("root");
        let mut chunk = Document::from_text("chunk");
        chunk.chunks.push(Document::from_text("sentence"));
        root.chunks.push(chunk);
        root.matches.push(Document::from_text("match"));
        vec![root]
    }

    fn texts(docs: Vec<&Document>) -> Vec<String> {
        docs.into_iter()
            .filter_map(|doc| doc.text.clone())
            .collect()
    }

    #[test]
    fn selects_each_level() -> Result<(), FlowError> {
        let docs = tree();
        assert_eq!(texts("@r".parse::<TraversalPaths>()?.select(&docs)), vec!["root"]);
        assert_eq!(texts("@c".parse::<TraversalPaths>()?.select(&docs)), vec!["chunk"]);
        assert_eq!(texts("@cc".parse::<TraversalPaths>()?.select(&docs)), vec!["sentence"]);
        assert_eq!(texts("@m".parse::<TraversalPaths>()?.select(&docs)), vec!["match"]);
        assert_eq!(
            texts("@r,c".parse::<TraversalPaths>()?.select(&docs)),
            vec!["root", "chunk"]
        );
        Ok(())
    }

    #[test]
    fn chunk_path_on_leaf_documents_selects_nothing() -> Result<(), FlowError> {
        let docs = vec![Document::from_text("query")];
        assert!("@c".parse::<TraversalPaths>()?.select(&docs).is_empty());
        Ok(())
    }

    #[test]
    fn apply_mut_visits_nested_selectors() -> Result<(), FlowError> {
        let mut docs = tree();
        let mut visited = 0;
        "@r,cc"
            .parse::<TraversalPaths>()?
            .apply_mut(&mut docs, |doc| {
                visited += 1;
                doc.tags.insert("seen".to_string(), true.into());
            });

        assert_eq!(visited, 2);
        assert!(docs[0].tags.contains_key("seen"));
        assert!(docs[0].chunks[0].chunks[0].tags.contains_key("seen"));
        assert!(!docs[0].chunks[0].tags.contains_key("seen"));
        Ok(())
    }

    #[test]
    fn rejects_malformed_paths() {
        assert!("r".parse::<TraversalPaths>().is_err());
        assert!("@x".parse::<TraversalPaths>().is_err());
        assert!("@rc".parse::<TraversalPaths>().is_err());
        assert!("@r,".parse::<TraversalPaths>().is_err());
    }
}
