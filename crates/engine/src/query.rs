//! Resolves [`QuerySpec`]s against a [`Document`].
//!
//! Un-parented specs resolve against the ambient base of a [`Scope`]. The
//! scope is passed down explicitly; `foreach` narrows it with
//! [`Scope::enter`] and the returned guard restores it when dropped.

use async_recursion::async_recursion;
use cmpilot_core::{Document, DomError, ElementHandle, QuerySpec};
use std::ops::{Deref, DerefMut};
use tracing::warn;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryResult {
    pub parent: Option<ElementHandle>,
    pub target: Option<ElementHandle>,
}

impl QueryResult {
    pub fn is_found(&self) -> bool {
        self.target.is_some()
    }
}

/// Stack of base elements; the top is the ambient base, empty means the document root.
#[derive(Debug, Default)]
pub struct Scope {
    stack: Vec<ElementHandle>,
}

impl Scope {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn base(&self) -> Option<ElementHandle> {
        self.stack.last().copied()
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Makes `base` the ambient base until the guard is dropped.
    pub fn enter(&mut self, base: ElementHandle) -> ScopeGuard<'_> {
        let depth = self.stack.len();
        self.stack.push(base);
        ScopeGuard { scope: self, depth }
    }
}

pub struct ScopeGuard<'s> {
    scope: &'s mut Scope,
    depth: usize,
}

impl Deref for ScopeGuard<'_> {
    type Target = Scope;

    fn deref(&self) -> &Scope {
        self.scope
    }
}

impl DerefMut for ScopeGuard<'_> {
    fn deref_mut(&mut self) -> &mut Scope {
        self.scope
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.scope.stack.truncate(self.depth);
    }
}

#[derive(Clone, Copy)]
pub struct QueryEngine<'a> {
    doc: &'a dyn Document,
}

impl<'a> QueryEngine<'a> {
    pub fn new(doc: &'a dyn Document) -> Self {
        Self { doc }
    }

    /// Singular lookup. Always yields one result; `target` is `None` when nothing matched.
    pub async fn find(&self, spec: &QuerySpec, scope: &Scope) -> Result<QueryResult, DomError> {
        self.find_from(spec, scope.base()).await
    }

    /// Plural lookup: one result per match, in document order.
    pub async fn find_all(&self, spec: &QuerySpec, scope: &Scope) -> Result<Vec<QueryResult>, DomError> {
        self.resolve(spec, scope.base(), true).await
    }

    #[async_recursion]
    async fn find_from(&self, spec: &QuerySpec, base: Option<ElementHandle>) -> Result<QueryResult, DomError> {
        let results = self.resolve(spec, base, false).await?;
        if results.len() > 1 {
            warn!(
                selector = %spec.selector,
                matches = results.len(),
                "multiple matches for a single-target query, using the first"
            );
        }
        Ok(results.into_iter().next().unwrap_or_default())
    }

    #[async_recursion]
    async fn resolve(
        &self,
        spec: &QuerySpec,
        base: Option<ElementHandle>,
        multiple: bool,
    ) -> Result<Vec<QueryResult>, DomError> {
        let Some(parent_spec) = spec.parent.as_deref() else {
            let targets = self.select(spec, base).await?;
            return Ok(targets
                .into_iter()
                .map(|target| QueryResult {
                    parent: None,
                    target: Some(target),
                })
                .collect());
        };

        let parents: Vec<ElementHandle> = if multiple {
            self.resolve(parent_spec, base, true)
                .await?
                .into_iter()
                .filter_map(|result| result.target)
                .collect()
        } else {
            self.find_from(parent_spec, base).await?.target.into_iter().collect()
        };

        let mut results = Vec::new();
        for parent in parents {
            for target in self.select(spec, Some(parent)).await? {
                results.push(QueryResult {
                    parent: Some(parent),
                    target: Some(target),
                });
            }
        }
        Ok(results)
    }

    /// Selector match within `base`, then text, style, display, iframe and child filters in that order.
    async fn select(&self, spec: &QuerySpec, base: Option<ElementHandle>) -> Result<Vec<ElementHandle>, DomError> {
        let mut candidates = self.doc.query_selector_all(base, &spec.selector).await?;

        if let Some(filter) = &spec.text_filter {
            let mut kept = Vec::with_capacity(candidates.len());
            for element in candidates {
                if filter.matches(&self.doc.text_content(element).await?) {
                    kept.push(element);
                }
            }
            candidates = kept;
        }

        if !spec.style_filters.is_empty() {
            let mut kept = Vec::with_capacity(candidates.len());
            'candidates: for element in candidates {
                for filter in &spec.style_filters {
                    let actual = self.doc.computed_style(element, &filter.option).await?;
                    if !filter.accepts(&actual) {
                        continue 'candidates;
                    }
                }
                kept.push(element);
            }
            candidates = kept;
        }

        if let Some(displayed) = spec.display_filter {
            let mut kept = Vec::with_capacity(candidates.len());
            for element in candidates {
                let rect = self.doc.bounding_rect(element).await?;
                if (rect.height != 0.0) == displayed {
                    kept.push(element);
                }
            }
            candidates = kept;
        }

        if let Some(nested) = spec.iframe_filter {
            let mut kept = Vec::with_capacity(candidates.len());
            for element in candidates {
                if self.doc.in_nested_context(element).await? == nested {
                    kept.push(element);
                }
            }
            candidates = kept;
        }

        if let Some(child) = spec.child_filter.as_deref() {
            let mut kept = Vec::with_capacity(candidates.len());
            for element in candidates {
                if self.find_from(child, Some(element)).await?.is_found() {
                    kept.push(element);
                }
            }
            candidates = kept;
        }

        Ok(candidates)
    }
}
