use proc_macro2::{Span, TokenStream};
use quote::ToTokens;
use syn::spanned::Spanned;

#[macro_use]
extern crate quote;
extern crate syn;

/// Derives `crate::xdr::PackTo` for structs and discriminated unions.
///
/// Struct fields are packed in declaration order. Enum variants are
/// packed as a 32-bit discriminant followed by the single payload field,
/// if any. Discriminants count up from zero unless given with
/// `#[xdr(N)]` or a Rust discriminant.
#[proc_macro_derive(PackTo, attributes(xdr))]
pub fn derive_pack_to(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let ast = syn::parse_macro_input!(input as syn::DeriveInput);
    let gen = impl_pack_to(&ast);
    gen.into()
}

/// Transform the input into a token stream containing the generated
/// implementation followed by every error collected on the way.
fn impl_pack_to(input: &syn::DeriveInput) -> TokenStream {
    let mut errors: Vec<syn::Error> = Vec::new();

    let mut output_tokens = match &input.data {
        syn::Data::Struct(ds) => impl_pack_to_struct(&input.ident, ds),
        syn::Data::Enum(de) => impl_pack_to_enum(&input.ident, de, &mut errors),
        syn::Data::Union(_) => {
            errors.push(syn::Error::new(
                input.span(),
                "`#[derive(PackTo)]` cannot be applied to unions",
            ));
            TokenStream::new()
        }
    };

    output_tokens.extend(errors.iter().map(|err| err.to_compile_error()));

    output_tokens
}

fn impl_pack_to_struct(name: &syn::Ident, ds: &syn::DataStruct) -> TokenStream {
    let accessors: Vec<TokenStream> = match &ds.fields {
        syn::Fields::Named(fields) => fields
            .named
            .iter()
            .filter_map(|f| f.ident.as_ref())
            .map(|ident| ident.to_token_stream())
            .collect(),
        syn::Fields::Unnamed(fields) => (0..fields.unnamed.len())
            .map(|n| syn::Index::from(n).to_token_stream())
            .collect(),
        syn::Fields::Unit => Vec::new(),
    };

    let span = Span::call_site();
    quote_spanned! { span =>
        #[automatically_derived]
        impl<B: crate::xdr::Packer> crate::xdr::PackTo<B> for #name {
            fn pack_to(&self, buf: &mut B) {
                #(
                    crate::xdr::PackTo::pack_to(&self.#accessors, buf);
                )*
            }
        }
    }
}

fn impl_pack_to_enum(
    name: &syn::Ident,
    de: &syn::DataEnum,
    errors: &mut Vec<syn::Error>,
) -> TokenStream {
    let mut arms = Vec::new();
    let mut discriminant = quote!(0u32);
    let mut has_discriminants = false;

    for variant in de.variants.iter() {
        let n_from_attr = discriminant_from_attr(errors, &variant.attrs);
        let n_from_discriminant = match &variant.discriminant {
            None => None,
            Some((_, expr)) => {
                has_discriminants = true;
                Some(expr.to_token_stream())
            }
        };

        if n_from_attr.is_some() && has_discriminants {
            errors.push(syn::Error::new(
                de.enum_token.span(),
                "`#[derive(PackTo)]` cannot mix custom discriminant and attribute based discriminant",
            ));

            continue;
        }

        if let Some(n) = n_from_attr.or(n_from_discriminant) {
            discriminant = n;
        }

        let var_name = &variant.ident;
        let span = variant.span();

        let (capture, pack_inner) = match &variant.fields {
            syn::Fields::Unit => (TokenStream::new(), TokenStream::new()),
            syn::Fields::Unnamed(unnamed) if unnamed.unnamed.len() == 1 => (
                quote_spanned!( span => (inner) ),
                quote_spanned!( span => crate::xdr::PackTo::pack_to(inner, buf); ),
            ),
            syn::Fields::Unnamed(unnamed) => {
                errors.push(syn::Error::new(
                    unnamed.paren_token.span,
                    "`#[derive(PackTo)]` enum variant cannot contain more than one field",
                ));

                continue;
            }
            syn::Fields::Named(named) => {
                errors.push(syn::Error::new(
                    named.brace_token.span,
                    "`#[derive(PackTo)]` is not supported on struct-like enum variants",
                ));

                continue;
            }
        };

        arms.push(quote_spanned! { span => #name::#var_name #capture => {
            crate::xdr::Packer::pack_uint(buf, (#discriminant) as u32);
            #pack_inner
        }, });

        discriminant = quote!((#discriminant) + 1);
    }

    if arms.is_empty() {
        errors.push(syn::Error::new(
            de.brace_token.span,
            "`#[derive(PackTo)]` cannot derive for empty enum",
        ));

        return TokenStream::new();
    }

    let span = de.brace_token.span;
    quote_spanned! { span =>
        #[automatically_derived]
        impl<B: crate::xdr::Packer> crate::xdr::PackTo<B> for #name {
            fn pack_to(&self, buf: &mut B) {
                match self {
                #(
                    #arms
                )*
                }
            }
        }
    }
}

/// Reads the discriminant out of an `#[xdr(N)]` attribute, if present
fn discriminant_from_attr(
    errors: &mut Vec<syn::Error>,
    attrs: &[syn::Attribute],
) -> Option<TokenStream> {
    for attr in attrs {
        let segments = &attr.path.segments;
        if segments.len() != 1 || segments[0].ident != "xdr" {
            continue;
        }
        return match attr.parse_args::<syn::Expr>() {
            Ok(expr) => Some(expr.to_token_stream()),
            Err(e) => {
                errors.push(e);
                None
            }
        };
    }

    None
}
