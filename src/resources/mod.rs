//! Data side of the console's list/create/edit/view screens. Every admin
//! screen is a collection path; [`Resource`] gives it the five CURD calls.

pub mod tree;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::{ApiClient, RequestOptions};
use crate::error::ApiError;

pub use tree::{build_tree, TreeNode};

/// The console's admin screens and the collections behind them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminResource {
    Tenants,
    Roles,
    Permissions,
    Menus,
    Groups,
    Options,
    Activities,
    Policies,
    Moderation,
}

impl AdminResource {
    pub const ALL: [AdminResource; 9] = [
        AdminResource::Tenants,
        AdminResource::Roles,
        AdminResource::Permissions,
        AdminResource::Menus,
        AdminResource::Groups,
        AdminResource::Options,
        AdminResource::Activities,
        AdminResource::Policies,
        AdminResource::Moderation,
    ];

    pub fn path(&self) -> &'static str {
        match self {
            AdminResource::Tenants => "/v1/tenants",
            AdminResource::Roles => "/v1/roles",
            AdminResource::Permissions => "/v1/permissions",
            AdminResource::Menus => "/v1/menus",
            AdminResource::Groups => "/v1/groups",
            AdminResource::Options => "/v1/options",
            AdminResource::Activities => "/v1/activities",
            AdminResource::Policies => "/v1/policies",
            AdminResource::Moderation => "/v1/moderation",
        }
    }

    pub fn name(&self) -> &'static str {
        self.path().trim_start_matches("/v1/")
    }

    /// Menus and permissions come back flat and are shown as trees
    pub fn is_tree(&self) -> bool {
        matches!(self, AdminResource::Menus | AdminResource::Permissions)
    }
}

impl std::str::FromStr for AdminResource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|resource| resource.name() == wanted)
            .ok_or_else(|| format!("unknown resource: {}", s))
    }
}

/// Paging, sorting and filtering of a list call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub page: u32,
    pub limit: u32,
    pub sort: Option<String>,
    pub filters: BTreeMap<String, String>,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            page: 1,
            limit: 20,
            sort: None,
            filters: BTreeMap::new(),
        }
    }
}

impl ListQuery {
    pub fn page(mut self, page: u32) -> Self {
        self.page = page.max(1);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = limit.max(1);
        self
    }

    pub fn sort(mut self, sort: impl Into<String>) -> Self {
        self.sort = Some(sort.into());
        self
    }

    pub fn filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }

    pub fn to_query(&self) -> Vec<(String, String)> {
        let mut query = vec![
            ("page".to_string(), self.page.to_string()),
            ("limit".to_string(), self.limit.to_string()),
        ];
        if let Some(sort) = &self.sort {
            query.push(("sort".to_string(), sort.clone()));
        }
        query.extend(self.filters.iter().map(|(k, v)| (k.clone(), v.clone())));
        query
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

impl Page<Value> {
    /// Accepts a bare array, or an object with the rows under
    /// `items`/`list`/`records`/`rows` and the count under `total`/`count`
    pub fn from_data(data: Value, query: &ListQuery) -> Result<Self, ApiError> {
        let (items, total) = match data {
            Value::Array(items) => {
                let total = items.len() as u64;
                (items, total)
            }
            Value::Object(mut map) => {
                let items = ["items", "list", "records", "rows"]
                    .iter()
                    .find_map(|key| match map.remove(*key) {
                        Some(Value::Array(items)) => Some(items),
                        _ => None,
                    })
                    .ok_or_else(|| ApiError::Decode("list response has no rows".to_string()))?;
                let total = ["total", "count"]
                    .iter()
                    .find_map(|key| map.get(*key).and_then(Value::as_u64))
                    .unwrap_or(items.len() as u64);
                (items, total)
            }
            other => {
                return Err(ApiError::Decode(format!("unexpected list response: {}", other)));
            }
        };

        Ok(Page {
            items,
            total,
            page: query.page,
            limit: query.limit,
        })
    }
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> u64 {
        if self.limit == 0 {
            return 0;
        }
        self.total.div_ceil(u64::from(self.limit))
    }
}

#[derive(Clone)]
pub struct Resource {
    client: ApiClient,
    path: String,
}

impl Resource {
    pub fn new(client: ApiClient, path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            client,
            path: path.trim_end_matches('/').to_string(),
        }
    }

    pub fn admin(client: ApiClient, resource: AdminResource) -> Self {
        Self::new(client, resource.path())
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn item_path(&self, id: &str) -> String {
        format!("{}/{}", self.path, id)
    }

    pub async fn list(&self, query: &ListQuery) -> Result<Page<Value>, ApiError> {
        let options = RequestOptions {
            query: query.to_query(),
            ..RequestOptions::default()
        };
        let response = self.client.get(&self.path, options).await?;
        Page::from_data(response.into_data(), query)
    }

    pub async fn show(&self, id: &str) -> Result<Value, ApiError> {
        let response = self.client.get(&self.item_path(id), RequestOptions::default()).await?;
        Ok(response.into_data())
    }

    pub async fn create(&self, body: Value) -> Result<Value, ApiError> {
        let response = self.client.post(&self.path, Some(body), RequestOptions::default()).await?;
        Ok(response.into_data())
    }

    pub async fn update(&self, id: &str, body: Value) -> Result<Value, ApiError> {
        let response = self
            .client
            .put(&self.item_path(id), Some(body), RequestOptions::default())
            .await?;
        Ok(response.into_data())
    }

    pub async fn remove(&self, id: &str) -> Result<(), ApiError> {
        self.client
            .delete(&self.item_path(id), None, RequestOptions::default())
            .await?;
        Ok(())
    }

    /// Every row, nested by `parent_key`. Pulls pages until `total` is reached.
    pub async fn tree(&self, id_key: &str, parent_key: &str, limit: u32) -> Result<Vec<TreeNode>, ApiError> {
        let mut query = ListQuery::default().limit(limit);
        let mut items = Vec::new();
        loop {
            let page = self.list(&query).await?;
            let fetched = page.items.len();
            let total = page.total;
            items.extend(page.items);
            if fetched == 0 || items.len() as u64 >= total {
                break;
            }
            query = query.clone().page(query.page + 1);
        }
        Ok(build_tree(items, id_key, parent_key))
    }
}
