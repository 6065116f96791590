//! A derive macro for the `Event` trait in the `tirian` crate.
use proc_macro::TokenStream;
use quote::quote;
use syn::{Attribute, Data, DeriveInput, Fields, LitInt, LitStr, parse_macro_input};

const DEFAULT_SOURCE: &str = "urn:tirian:event";

/// Version and source settings read from `#[event(...)]`.
#[derive(Clone)]
struct EventAttrs {
    version: u16,
    source: String,
}

impl EventAttrs {
    fn parse(attrs: &[Attribute], inherited: EventAttrs) -> syn::Result<Self> {
        let mut out = inherited;
        for attr in attrs.iter().filter(|a| a.path().is_ident("event")) {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("version") {
                    let lit: LitInt = meta.value()?.parse()?;
                    out.version = lit.base10_parse()?;
                    Ok(())
                } else if meta.path.is_ident("source") {
                    let lit: LitStr = meta.value()?.parse()?;
                    out.source = lit.value();
                    Ok(())
                } else {
                    Err(meta.error("expected `version` or `source`"))
                }
            })?;
        }
        Ok(out)
    }
}

/// Derives the `Event` trait for an enum.
///
/// `event_type` returns the variant name. `event_version` and `event_source`
/// come from `#[event(version = .., source = "..")]` on the enum, and can be
/// overridden per variant. Defaults are version 1 and `urn:tirian:event`.
#[proc_macro_derive(Event, attributes(event))]
pub fn event_derive(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn expand(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;

    let variants = match &input.data {
        Data::Enum(data) => &data.variants,
        _ => {
            return Err(syn::Error::new_spanned(
                name,
                "Event derive macro can only be used on enums",
            ));
        }
    };

    let defaults = EventAttrs::parse(
        &input.attrs,
        EventAttrs {
            version: 1,
            source: DEFAULT_SOURCE.to_owned(),
        },
    )?;

    let mut type_arms = Vec::new();
    let mut version_arms = Vec::new();
    let mut source_arms = Vec::new();

    for variant in variants {
        let variant_name = &variant.ident;
        let pattern = match &variant.fields {
            Fields::Named(_) => quote! { #name::#variant_name { .. } },
            Fields::Unnamed(_) => quote! { #name::#variant_name(..) },
            Fields::Unit => quote! { #name::#variant_name },
        };
        let attrs = EventAttrs::parse(&variant.attrs, defaults.clone())?;
        let version = attrs.version;
        let source = attrs.source;

        type_arms.push(quote! { #pattern => stringify!(#variant_name) });
        version_arms.push(quote! { #pattern => #version });
        source_arms.push(quote! { #pattern => #source });
    }

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics tirian::Event for #name #ty_generics #where_clause {
            fn event_type(&self) -> &'static str {
                match self {
                    #(#type_arms),*
                }
            }

            fn event_version(&self) -> u16 {
                match self {
                    #(#version_arms),*
                }
            }

            fn event_source(&self) -> &'static str {
                match self {
                    #(#source_arms),*
                }
            }
        }
    })
}
