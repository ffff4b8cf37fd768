//! Search facade over the catalog store.

use indexmap::IndexMap;
use utoipa::IntoParams;

use crate::catalog::Catalog;
use crate::error::{CatalogError, CatalogOp, Result, ValidationError};
use crate::installer::Installer;

/// Installers keyed by ID, in result order.
pub type InstallerMap = IndexMap<String, Installer>;

/// External search query. Exactly one mode must be set.
#[derive(Debug, Clone, Default, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SearchQuery {
    /// Capability token an installer version must provide
    pub provides: Option<String>,
    /// Free-text term matched against names and version content
    pub general: Option<String>,
}

/// Validated search mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchMode<'a> {
    Provides(&'a str),
    General(&'a str),
}

impl SearchQuery {
    pub fn provides(token: &str) -> Self {
        Self {
            provides: Some(token.to_string()),
            general: None,
        }
    }

    pub fn general(term: &str) -> Self {
        Self {
            provides: None,
            general: Some(term.to_string()),
        }
    }

    /// Build a query from raw query-string pairs. The first value of a
    /// repeated parameter wins; unknown parameters are ignored.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut query = Self::default();
        for (key, value) in pairs {
            let slot = match key.as_str() {
                "provides" => &mut query.provides,
                "general" => &mut query.general,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value);
            }
        }
        query
    }

    /// Resolve the query mode. Empty parameters count as missing.
    pub fn mode(&self) -> std::result::Result<SearchMode<'_>, ValidationError> {
        let provides = non_empty(&self.provides);
        let general = non_empty(&self.general);
        match (provides, general) {
            (Some(token), None) => Ok(SearchMode::Provides(token)),
            (None, Some(term)) => Ok(SearchMode::General(term)),
            (None, None) => Err(ValidationError::MissingQuery),
            (Some(_), Some(_)) => Err(ValidationError::AmbiguousQuery),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl Catalog {
    /// Run a provider or free-text search, keyed by installer ID.
    ///
    /// Entries keep the store order: best match first for free text.
    pub async fn search(&self, query: &SearchQuery) -> Result<InstallerMap> {
        Ok(self
            .search_ranked(query)
            .await?
            .into_iter()
            .map(|installer| (installer.id.clone(), installer))
            .collect())
    }

    /// Run a provider or free-text search, in store order.
    pub async fn search_ranked(&self, query: &SearchQuery) -> Result<Vec<Installer>> {
        let mode = query.mode()?;
        let (label, result) = match mode {
            SearchMode::Provides(token) => (token, self.store().search_by_provider(token).await),
            SearchMode::General(term) => (term, self.store().search(term).await),
        };
        let mut installers = result.map_err(|e| CatalogError::store(CatalogOp::Search, label, e))?;
        for installer in &mut installers {
            installer.migrate_id();
        }
        Ok(installers)
    }
}
