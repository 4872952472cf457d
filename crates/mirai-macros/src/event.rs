//! `#[derive(ConcreteEvent)]` implementation.
//!
//! Every concrete event struct lives in exactly one variant of the closed
//! `Event` enum, and that variant shares its name with an `EventType` tag.
//! The derive emits the three conversions the waiter queue needs:
//!
//! | Item | Purpose |
//! |------|---------|
//! | `ConcreteEvent::TYPE` | tag compared before a predicate is invoked |
//! | `ConcreteEvent::peek` | borrow the payload out of an `&Event` |
//! | `ConcreteEvent::extract` | move the payload out, or hand the event back |
//! | `From<Self> for Event` | wrap a payload back into the sum type |

use proc_macro2::TokenStream;
use quote::{format_ident, quote};
use syn::{Attribute, Data, DeriveInput, Ident, spanned::Spanned};

// ============================================================================
// Attribute parsing
// ============================================================================

fn parse_variant(attrs: &[Attribute], name: &Ident) -> syn::Result<Ident> {
    let mut variant: Option<syn::LitStr> = None;

    for attr in attrs {
        if !attr.path().is_ident("event") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("variant") {
                variant = Some(meta.value()?.parse()?);
                Ok(())
            } else {
                Err(meta.error("unsupported #[event] key, expected `variant`"))
            }
        })?;
    }

    if let Some(lit) = variant {
        return syn::parse_str::<Ident>(&lit.value())
            .map_err(|_| syn::Error::new(lit.span(), "`variant` must be a valid identifier"));
    }

    let raw = name.to_string();
    match raw.strip_suffix("Event") {
        Some(stem) if !stem.is_empty() => Ok(format_ident!("{}", stem, span = name.span())),
        _ => Err(syn::Error::new(
            name.span(),
            "cannot infer the event variant; add #[event(variant = \"...\")]",
        )),
    }
}

// ============================================================================
// Code generation
// ============================================================================

pub fn derive_concrete_event(input: &DeriveInput) -> syn::Result<TokenStream> {
    if !matches!(input.data, Data::Struct(_)) {
        return Err(syn::Error::new(
            input.span(),
            "ConcreteEvent can only be derived for structs",
        ));
    }
    if !input.generics.params.is_empty() {
        return Err(syn::Error::new(
            input.generics.span(),
            "ConcreteEvent cannot be derived for generic structs",
        ));
    }

    let name = &input.ident;
    let variant = parse_variant(&input.attrs, name)?;

    Ok(quote! {
        impl ::mirai_core::ConcreteEvent for #name {
            const TYPE: ::mirai_core::EventType = ::mirai_core::EventType::#variant;

            fn peek(event: &::mirai_core::Event) -> ::core::option::Option<&Self> {
                match event {
                    ::mirai_core::Event::#variant(inner) => ::core::option::Option::Some(inner),
                    _ => ::core::option::Option::None,
                }
            }

            fn extract(
                event: ::mirai_core::Event,
            ) -> ::core::result::Result<Self, ::mirai_core::Event> {
                match event {
                    ::mirai_core::Event::#variant(inner) => ::core::result::Result::Ok(inner),
                    other => ::core::result::Result::Err(other),
                }
            }
        }

        impl ::core::convert::From<#name> for ::mirai_core::Event {
            fn from(event: #name) -> Self {
                ::mirai_core::Event::#variant(event)
            }
        }
    })
}
