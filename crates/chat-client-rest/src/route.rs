//! REST routes
//!
//! A route pairs the concrete path of one request with the template it
//! was built from. The template identifies the route for rate-limit hash
//! learning; the major parameter (channel/guild/webhook ID embedded in
//! the path) scopes the learned bucket per resource.

use reqwest::Method;

/// One REST call's identity for routing and rate limiting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    method: Method,
    template: String,
    path: String,
    major: String,
}

impl Route {
    /// Create a route from its method, path template, and concrete path
    ///
    /// `template` keeps its parameter placeholders (e.g.
    /// `/channels/{id}/messages`), `path` has them substituted. Routes
    /// without a major parameter share one bucket per learned hash.
    #[must_use]
    pub fn new(method: Method, template: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method,
            template: template.into(),
            path: path.into(),
            major: String::new(),
        }
    }

    /// Scope this route's bucket to a major parameter value
    #[must_use]
    pub fn with_major(mut self, major: impl std::fmt::Display) -> Self {
        self.major = major.to_string();
        self
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Concrete request path, relative to the API base URL
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Identity the server teaches bucket hashes against
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}:{}", self.method, self.template)
    }

    /// Bucket identity: learned (or provisional) hash plus major parameter
    #[must_use]
    pub fn bucket_key(&self, hash: &str) -> String {
        format!("{}:{}", hash, self.major)
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}
