//! Derive macro for error types.
//!
//! Generates `std::fmt::Display` and `std::error::Error` implementations.
//! Replacement for the `thiserror` crate, restricted to enums.
//!
//! # Usage
//!
//! ```ignore
//! use randomvm_derive::Error;
//!
//! #[derive(Debug, Error)]
//! pub enum MyError {
//!     #[error("allocation of {0} bytes failed")]
//!     Allocation(usize),
//!
//!     #[error("requested block {requested}, prepared block {prepared}")]
//!     WrongBlock { requested: u32, prepared: u32 },
//!
//!     #[error("worker unavailable")]
//!     WorkerGone,
//! }
//! ```
//!
//! Tuple fields are referenced positionally (`{0}`, `{1}`), named fields by
//! name (`{field}`). Every variant must carry an `#[error("...")]` attribute.

use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{Data, DeriveInput, Fields, Lit, Meta, parse_macro_input};

/// Derives `Display` and `Error` for an enum.
pub fn derive_error(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match expand(&input) {
        Ok(tokens) => TokenStream::from(tokens),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;

    let Data::Enum(data) = &input.data else {
        return Err(syn::Error::new_spanned(
            input,
            "Error derive supports only enums",
        ));
    };

    let arms = data
        .variants
        .iter()
        .map(|variant| {
            let ident = &variant.ident;
            let message = error_message(variant)?;

            Ok(match &variant.fields {
                Fields::Unit => quote! {
                    Self::#ident => write!(f, #message),
                },
                Fields::Unnamed(fields) => {
                    let bindings: Vec<_> = (0..fields.unnamed.len())
                        .map(|i| format_ident!("f{}", i))
                        .collect();
                    quote! {
                        Self::#ident(#(#bindings),*) => write!(f, #message, #(#bindings),*),
                    }
                }
                Fields::Named(fields) => {
                    let bindings: Vec<_> = fields.named.iter().map(|f| &f.ident).collect();
                    quote! {
                        Self::#ident { #(#bindings),* } => write!(f, #message, #(#bindings = #bindings),*),
                    }
                }
            })
        })
        .collect::<syn::Result<Vec<_>>>()?;

    Ok(quote! {
        impl ::std::fmt::Display for #name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                match self {
                    #(#arms)*
                }
            }
        }

        impl ::std::error::Error for #name {}
    })
}

/// Extracts the string literal from a variant's `#[error("...")]` attribute.
fn error_message(variant: &syn::Variant) -> syn::Result<String> {
    for attr in &variant.attrs {
        if !attr.path().is_ident("error") {
            continue;
        }
        if let Meta::List(list) = &attr.meta
            && let Ok(Lit::Str(lit)) = syn::parse2::<Lit>(list.tokens.clone())
        {
            return Ok(lit.value());
        }
        return Err(syn::Error::new_spanned(
            &attr.meta,
            "invalid #[error] attribute; expected #[error(\"message\")]",
        ));
    }

    Err(syn::Error::new_spanned(
        variant,
        format!(
            "missing #[error(\"...\")] attribute on variant `{}`",
            variant.ident
        ),
    ))
}
