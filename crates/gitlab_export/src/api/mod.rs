//! GitLab request layer.
//!
//! # Modules
//!
//! - [`requester`] - Concurrency-capped, retrying REST requester
//! - [`graphql`] - GraphQL requester sharing the REST policy
//! - [`paginate`] - Page-number and cursor pagination drivers
//! - [`client`] - Typed endpoint wrappers
//! - [`types`] - API data types
//! - [`error`] - Request errors

pub mod client;
pub mod error;
pub mod graphql;
pub mod paginate;
pub mod requester;
pub mod types;

pub use client::{GitLabClient, HookScope, Page};
pub use error::ApiError;
pub use graphql::{GraphqlRequester, extract_graphql_id};
pub use paginate::{PageInfo, paginate, paginate_newer_than, paginate_start_at};
pub use requester::{NextPage, Requester};
