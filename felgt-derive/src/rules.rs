//! Builtin validation rules.
//!
//! Each rule expands to a block that inspects a `value: &str` binding and returns
//! `Err(E::from(String))` from the generated constructor when the check fails.

use proc_macro2::{Ident, TokenStream};
use quote::quote;

pub(crate) fn dispatch(rule: &str, field: &Ident) -> Option<TokenStream> {
    match rule {
        "non_empty" => Some(non_empty(field)),
        "no_special_chars" => Some(no_special_chars(field)),
        "nit" => Some(nit(field)),
        "email" => Some(email(field)),
        "is_country_code" => Some(is_country_code(field)),
        _ => None,
    }
}

fn non_empty(field: &Ident) -> TokenStream {
    quote! {
        if value.trim().is_empty() {
            return Err(E::from(format!("{} must be non-empty", stringify!(#field))));
        }
    }
}

fn no_special_chars(field: &Ident) -> TokenStream {
    quote! {
        if value.contains(|c: char| !(c.is_alphanumeric() || c.is_whitespace())) {
            return Err(E::from(format!("{} must not contain special characters", stringify!(#field))));
        }
    }
}

/// Guatemalan tax id: `CF`, or digits followed by a modulo-11 check character (`0-9` or `K`).
/// Hyphens are ignored.
fn nit(field: &Ident) -> TokenStream {
    quote! {
        {
            let nit: String = value
                .chars()
                .filter(|c| *c != '-')
                .collect::<String>()
                .to_ascii_uppercase();
            let valid = nit == "CF"
                || (nit.len() >= 2 && nit.is_ascii() && {
                    let (body, check) = nit.split_at(nit.len() - 1);
                    body.chars().all(|c| c.is_ascii_digit()) && {
                        let len = body.len() as u32;
                        let sum: u32 = body
                            .chars()
                            .enumerate()
                            .map(|(i, c)| c.to_digit(10).unwrap_or(0) * (len + 1 - i as u32))
                            .sum();
                        match (11 - sum % 11) % 11 {
                            10 => check == "K",
                            digit => check == digit.to_string(),
                        }
                    }
                });
            if !valid {
                return Err(E::from(format!("{} must be a valid NIT", stringify!(#field))));
            }
        }
    }
}

fn email(field: &Ident) -> TokenStream {
    quote! {
        {
            let valid = match value.split_once('@') {
                Some((local, domain)) => {
                    !local.is_empty()
                        && domain.contains('.')
                        && !domain.starts_with('.')
                        && !domain.ends_with('.')
                        && !value.contains(char::is_whitespace)
                }
                None => false,
            };
            if !valid {
                return Err(E::from(format!("{} must be a valid e-mail address", stringify!(#field))));
            }
        }
    }
}

/// ISO 3166-1 alpha-2 shape check (two ASCII letters).
fn is_country_code(field: &Ident) -> TokenStream {
    quote! {
        if !(value.len() == 2 && value.chars().all(|c| c.is_ascii_alphabetic())) {
            return Err(E::from(format!("{} must be a valid country code", stringify!(#field))));
        }
    }
}
