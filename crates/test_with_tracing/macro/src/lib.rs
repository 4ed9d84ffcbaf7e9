// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Procedural macro behind `test_with_tracing::test`.
//!
//! The attribute turns a plain test function into a `#[test]` that first
//! initializes tracing and then runs the original body inside a span named
//! after the test.

use proc_macro::TokenStream;
use quote::quote;
use syn::parse_macro_input;
use syn::spanned::Spanned;
use syn::Error;
use syn::ItemFn;

/// Attribute macro for tests that want tracing output.
///
/// # Constraints
///
/// - The function must not be async
/// - The function must not take any parameters
#[proc_macro_attribute]
pub fn test(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let item = parse_macro_input!(item as ItemFn);
    make_test(item)
        .unwrap_or_else(|err| err.to_compile_error())
        .into()
}

fn make_test(item: ItemFn) -> syn::Result<proc_macro2::TokenStream> {
    if item.sig.asyncness.is_some() {
        return Err(Error::new(
            item.sig.fn_token.span(),
            "test function must not be async",
        ));
    }

    if !item.sig.inputs.is_empty() {
        return Err(Error::new(item.sig.inputs.span(), "expected 0 arguments"));
    }

    let name = &item.sig.ident;
    let return_type = &item.sig.output;
    let attrs = &item.attrs;

    // Attributes such as `should_panic` belong on the outer test only.
    let mut inner = item.clone();
    inner.attrs.clear();

    Ok(quote! {
        #[::core::prelude::v1::test]
        #(#attrs)*
        fn #name() #return_type {
            #inner
            ::test_with_tracing::init();
            let span = ::test_with_tracing::tracing::span!(
                ::test_with_tracing::tracing::Level::INFO,
                stringify!(#name)
            );
            let _span_guard = span.enter();
            #name()
        }
    })
}
