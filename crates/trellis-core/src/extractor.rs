//! Handler argument extraction.
//!
//! Every extractor is a view of the same [`Context`], so `Params(p)` in a
//! handler signature always equals `ctx.params()` for that invocation.
//!
//! ```rust,ignore
//! async fn show(Params(params): Params, Injected(values): Injected) -> HandlerResult {
//!     // ...
//! }
//! ```

use std::any::type_name;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::context::{Context, HeaderMap, QueryMap};
use crate::error::{ExtractError, ExtractResult};
use crate::pattern::ParamMap;
use crate::transport::{Method, Transport};

/// A trait for types that can be extracted from a [`Context`].
///
/// A failed extraction short-circuits the handler with a 400.
pub trait FromContext: Sized {
    /// Attempts to extract this type from the given context.
    fn from_context(ctx: &Context) -> ExtractResult<Self>;
}

impl FromContext for Context {
    fn from_context(ctx: &Context) -> ExtractResult<Self> {
        Ok(ctx.clone())
    }
}

/// Implementation for `Option<T>`: a failed extraction yields `None`.
impl<T: FromContext> FromContext for Option<T> {
    fn from_context(ctx: &Context) -> ExtractResult<Self> {
        Ok(T::from_context(ctx).ok())
    }
}

impl FromContext for Method {
    fn from_context(ctx: &Context) -> ExtractResult<Self> {
        Ok(ctx.method())
    }
}

impl FromContext for Transport {
    fn from_context(ctx: &Context) -> ExtractResult<Self> {
        Ok(ctx.transport())
    }
}

/// The decoded body.
///
/// `Body<Value>` never fails; any other `T` is deserialized from the body.
#[derive(Debug, Clone)]
pub struct Body<T>(pub T);

impl<T: DeserializeOwned> FromContext for Body<T> {
    fn from_context(ctx: &Context) -> ExtractResult<Self> {
        serde_json::from_value(ctx.body().clone())
            .map(Body)
            .map_err(|e| ExtractError::InvalidBody {
                expected: type_name::<T>(),
                reason: e.to_string(),
            })
    }
}

/// The query parameters.
#[derive(Debug, Clone, Default)]
pub struct Query(pub QueryMap);

impl FromContext for Query {
    fn from_context(ctx: &Context) -> ExtractResult<Self> {
        Ok(Query(ctx.query().clone()))
    }
}

/// The path parameters captured by the matched pattern.
#[derive(Debug, Clone, Default)]
pub struct Params(pub ParamMap);

impl Params {
    /// A single parameter.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }
}

impl FromContext for Params {
    fn from_context(ctx: &Context) -> ExtractResult<Self> {
        Ok(Params(ctx.params().clone()))
    }
}

/// The request headers.
#[derive(Debug, Clone, Default)]
pub struct Headers(pub HeaderMap);

impl FromContext for Headers {
    fn from_context(ctx: &Context) -> ExtractResult<Self> {
        Ok(Headers(ctx.headers().clone()))
    }
}

/// Values produced by the channel's builder middleware, outermost first.
#[derive(Debug, Clone, Default)]
pub struct Injected(pub Vec<Value>);

impl Injected {
    /// Deserializes the value at `index`.
    pub fn get<T: DeserializeOwned>(&self, index: usize) -> Option<T> {
        self.0
            .get(index)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

impl FromContext for Injected {
    fn from_context(ctx: &Context) -> ExtractResult<Self> {
        Ok(Injected(ctx.injected().to_vec()))
    }
}

/// Live access to the invocation's locals.
///
/// Writes are visible to everything sharing the invocation.
#[derive(Debug, Clone)]
pub struct Locals(Context);

impl Locals {
    pub fn get(&self, key: &str) -> Option<Value> {
        self.0.local(key)
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.0.set_local(key, value);
    }

    /// A snapshot of every local.
    pub fn snapshot(&self) -> Map<String, Value> {
        self.0.locals()
    }
}

impl FromContext for Locals {
    fn from_context(ctx: &Context) -> ExtractResult<Self> {
        Ok(Locals(ctx.clone()))
    }
}

/// The raw request body. Only available over HTTP.
#[derive(Debug, Clone)]
pub struct RawBody(pub bytes::Bytes);

impl FromContext for RawBody {
    fn from_context(ctx: &Context) -> ExtractResult<Self> {
        ctx.http_surface()
            .map(|surface| RawBody(surface.raw_body().clone()))
            .ok_or(ExtractError::Unavailable {
                what: "raw body",
                transport: ctx.transport().as_str(),
            })
    }
}
