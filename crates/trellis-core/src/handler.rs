//! Handler system.
//!
//! Handlers are plain async functions whose arguments implement
//! [`FromContext`], implemented through blanket impls per arity the way axum
//! does it. The return value is anything [`IntoHandlerResult`]: `()` or a
//! `Result<(), E>` where `E` converts into [`HandlerError`].
//!
//! ```rust,ignore
//! async fn show(ctx: Context, Params(params): Params) -> HandlerResult {
//!     ctx.json(json!({ "id": params.get("id") }));
//!     Ok(())
//! }
//! ```

use std::any::Any;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
pub use futures::future::BoxFuture;

use crate::context::Context;
use crate::error::{HandlerError, HandlerResult};
use crate::extractor::FromContext;

// ============================================================================
// IntoHandlerResult
// ============================================================================

/// Converts a handler's return value into a [`HandlerResult`].
pub trait IntoHandlerResult: Send {
    fn into_handler_result(self) -> HandlerResult;
}

impl IntoHandlerResult for () {
    fn into_handler_result(self) -> HandlerResult {
        Ok(())
    }
}

impl<E> IntoHandlerResult for Result<(), E>
where
    E: Into<HandlerError> + Send,
{
    fn into_handler_result(self) -> HandlerResult {
        self.map_err(Into::into)
    }
}

// ============================================================================
// Handler Trait
// ============================================================================

/// A request or event handler.
///
/// Implemented for async functions taking up to eight [`FromContext`]
/// arguments.
pub trait Handler<T>: Clone + Send + Sync + 'static {
    /// The type of future calling this handler returns.
    type Future: Future<Output = HandlerResult> + Send + 'static;

    /// Calls the handler with the given context.
    fn call(self, ctx: Context) -> Self::Future;
}

impl<F, Fut> Handler<()> for F
where
    F: FnOnce() -> Fut + Clone + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: IntoHandlerResult,
{
    type Future = BoxFuture<'static, HandlerResult>;

    fn call(self, _ctx: Context) -> Self::Future {
        Box::pin(async move { (self)().await.into_handler_result() })
    }
}

macro_rules! impl_handler {
    (
        $($ty:ident),*
    ) => {
        #[allow(non_snake_case)]
        impl<F, Fut, $($ty,)*> Handler<($($ty,)*)> for F
        where
            F: FnOnce($($ty,)*) -> Fut + Clone + Send + Sync + 'static,
            Fut: Future + Send + 'static,
            Fut::Output: IntoHandlerResult,
            $( $ty: FromContext + Send + 'static, )*
        {
            type Future = BoxFuture<'static, HandlerResult>;

            fn call(self, ctx: Context) -> Self::Future {
                Box::pin(async move {
                    $(
                        let $ty = $ty::from_context(&ctx)?;
                    )*

                    (self)($($ty,)*).await.into_handler_result()
                })
            }
        }
    };
}

impl_handler!(T1);
impl_handler!(T1, T2);
impl_handler!(T1, T2, T3);
impl_handler!(T1, T2, T3, T4);
impl_handler!(T1, T2, T3, T4, T5);
impl_handler!(T1, T2, T3, T4, T5, T6);
impl_handler!(T1, T2, T3, T4, T5, T6, T7);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8);

// ============================================================================
// Type erasure
// ============================================================================

/// Object-safe form of [`Handler`].
pub trait ErasedHandler: Send + Sync {
    fn call(&self, ctx: Context) -> BoxFuture<'static, HandlerResult>;
}

/// A type-erased handler that can be stored in registries.
pub type BoxedHandler = Arc<dyn ErasedHandler>;

/// Wraps a [`Handler`] so it can be erased.
pub struct HandlerFn<F, T> {
    f: F,
    _marker: PhantomData<fn() -> T>,
}

impl<F, T> ErasedHandler for HandlerFn<F, T>
where
    F: Handler<T>,
    T: 'static,
{
    fn call(&self, ctx: Context) -> BoxFuture<'static, HandlerResult> {
        Box::pin(self.f.clone().call(ctx))
    }
}

/// Converts a handler function into a [`BoxedHandler`].
pub fn into_handler<F, T>(f: F) -> BoxedHandler
where
    F: Handler<T>,
    T: 'static,
{
    Arc::new(HandlerFn {
        f,
        _marker: PhantomData,
    })
}

// ============================================================================
// Panic boundary
// ============================================================================

/// Awaits `fut`, turning a panic into [`HandlerError::Panic`].
pub async fn catch_panic<F>(fut: F) -> Result<F::Output, HandlerError>
where
    F: Future,
{
    AssertUnwindSafe(fut)
        .catch_unwind()
        .await
        .map_err(|payload| HandlerError::Panic(panic_message(payload.as_ref())))
}

/// Runs a handler future behind the panic boundary.
pub async fn guarded<F>(fut: F) -> HandlerResult
where
    F: Future<Output = HandlerResult>,
{
    catch_panic(fut).await.and_then(|result| result)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RequestParts;
    use crate::error::StructuredError;
    use crate::extractor::{Body, Params};
    use crate::transport::Method;
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ctx(body: Value) -> Context {
        Context::event(RequestParts::new(Method::Get, "t").with_body(body), Vec::new(), None)
    }

    #[tokio::test]
    async fn test_zero_arg_handler() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        async fn handler() {
            CALLS.fetch_add(1, Ordering::SeqCst);
        }

        let h = into_handler(handler);
        h.call(ctx(Value::Null)).await.unwrap();
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_extractor_failure_is_bad_request() {
        async fn handler(Body(n): Body<u32>) -> HandlerResult {
            assert!(n > 0);
            Ok(())
        }

        let err = into_handler(handler)
            .call(ctx(json!("nope")))
            .await
            .unwrap_err()
            .into_structured();
        assert_eq!(err.status_code, 400);
    }

    #[tokio::test]
    async fn test_handler_error_is_propagated() {
        async fn handler(_ctx: Context, _p: Params) -> Result<(), StructuredError> {
            Err(StructuredError::forbidden("nope"))
        }

        let err = into_handler(handler).call(ctx(Value::Null)).await.unwrap_err();
        assert_eq!(err.into_structured().status_code, 403);
    }

    #[tokio::test]
    async fn test_guarded_catches_panic() {
        async fn handler() {
            panic!("boom");
        }

        let h = into_handler(handler);
        let err = guarded(h.call(ctx(Value::Null))).await.unwrap_err();
        assert!(matches!(&err, HandlerError::Panic(msg) if msg == "boom"));
        assert_eq!(err.into_structured().status_code, 500);
    }
}
