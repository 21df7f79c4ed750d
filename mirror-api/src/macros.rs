//! Utility macros for reducing boilerplate

/// Macro to implement `FromRef<AppState>` for state extractors.
///
/// Lets handlers extract one field of [`AppState`](crate::state::AppState)
/// directly.
///
/// # Example
/// ```ignore
/// impl_from_ref!(Arc<SourceRegistry>, sources);
/// // Expands to:
/// impl axum::extract::FromRef<AppState> for Arc<SourceRegistry> {
///     fn from_ref(state: &AppState) -> Self {
///         state.sources.clone()
///     }
/// }
/// ```
#[macro_export]
macro_rules! impl_from_ref {
    ($type:ty, $field:ident) => {
        impl axum::extract::FromRef<$crate::state::AppState> for $type {
            fn from_ref(state: &$crate::state::AppState) -> Self {
                state.$field.clone()
            }
        }
    };
}
