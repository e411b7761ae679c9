//! `#[test]` replacements that run the body on a watchdog thread.
//!
//! ```ignore
//! #[test_timeout::timeout]
//! fn quick() {}
//!
//! #[test_timeout::tokio_timeout_test(secs = 10, flavor = "multi_thread")]
//! async fn talks_to_a_server() {}
//! ```
//!
//! A bare integer (`#[test_timeout::timeout(5)]`) is accepted as the number
//! of seconds.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{
    parse::{Parse, ParseStream},
    parse_macro_input, Attribute, Ident, ItemFn, LitInt, LitStr, Token,
};

const DEFAULT_SECS: u64 = 60;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Flavor {
    CurrentThread,
    MultiThread,
}

struct Options {
    secs: u64,
    flavor: Flavor,
}

impl Parse for Options {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut options = Options {
            secs: DEFAULT_SECS,
            flavor: Flavor::CurrentThread,
        };
        if input.is_empty() {
            return Ok(options);
        }
        if input.peek(LitInt) {
            options.secs = parse_secs(&input.parse()?)?;
            return finish(input, options);
        }

        while !input.is_empty() {
            let key: Ident = input.parse()?;
            input.parse::<Token![=]>()?;
            match key.to_string().as_str() {
                "secs" => options.secs = parse_secs(&input.parse()?)?,
                "flavor" => {
                    let value: LitStr = input.parse()?;
                    options.flavor = match value.value().as_str() {
                        "current_thread" => Flavor::CurrentThread,
                        "multi_thread" => Flavor::MultiThread,
                        other => {
                            return Err(syn::Error::new_spanned(
                                &value,
                                format!("unknown runtime flavor `{other}`"),
                            ))
                        }
                    };
                }
                other => {
                    return Err(syn::Error::new_spanned(
                        &key,
                        format!("unknown option `{other}`; expected `secs` or `flavor`"),
                    ))
                }
            }
            if !input.is_empty() {
                input.parse::<Token![,]>()?;
            }
        }
        Ok(options)
    }
}

fn parse_secs(lit: &LitInt) -> syn::Result<u64> {
    let secs: u64 = lit.base10_parse()?;
    if secs == 0 {
        return Err(syn::Error::new_spanned(lit, "timeout must be greater than zero"));
    }
    Ok(secs)
}

fn finish(input: ParseStream, options: Options) -> syn::Result<Options> {
    if input.is_empty() {
        Ok(options)
    } else {
        Err(input.error("unexpected tokens after timeout"))
    }
}

/// Async test on its own Tokio runtime, bounded by a timeout.
#[proc_macro_attribute]
pub fn tokio_timeout_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let options = parse_macro_input!(attr as Options);
    let ItemFn {
        attrs,
        vis,
        mut sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.take().is_none() {
        return syn::Error::new_spanned(&sig.ident, "tokio_timeout_test needs an async fn")
            .to_compile_error()
            .into();
    }
    let secs = options.secs;
    // `multi_thread` needs tokio's `rt-multi-thread` feature in the test crate.
    let builder = match options.flavor {
        Flavor::CurrentThread => quote!(::tokio::runtime::Builder::new_current_thread()),
        Flavor::MultiThread => quote!(::tokio::runtime::Builder::new_multi_thread()),
    };
    let body = quote! {{
        let runtime = #builder
            .enable_all()
            .build()
            .expect("failed to build Tokio runtime");
        runtime.block_on(async move {
            ::tokio::time::timeout(
                ::std::time::Duration::from_secs(#secs),
                async move #block,
            )
            .await
            .expect("test timed out");
        });
    }};

    expand(attrs, vis, sig, secs, body, is_tokio_test)
}

/// Synchronous test bounded by a timeout.
#[proc_macro_attribute]
pub fn timeout(attr: TokenStream, item: TokenStream) -> TokenStream {
    let options = parse_macro_input!(attr as Options);
    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.is_some() {
        return syn::Error::new_spanned(&sig.ident, "use tokio_timeout_test for async fns")
            .to_compile_error()
            .into();
    }
    if options.flavor != Flavor::CurrentThread {
        return syn::Error::new_spanned(&sig.ident, "`flavor` only applies to async tests")
            .to_compile_error()
            .into();
    }

    expand(attrs, vis, sig, options.secs, quote!(#block), is_plain_test)
}

// Emits `#[test]` plus a wrapper that runs `body` on a fresh thread and
// re-raises its panic, or fails once `secs` elapse.
fn expand(
    attrs: Vec<Attribute>,
    vis: syn::Visibility,
    sig: syn::Signature,
    secs: u64,
    body: TokenStream2,
    is_duplicate: fn(&Attribute) -> bool,
) -> TokenStream {
    let attrs = attrs.into_iter().filter(|attr| !is_duplicate(attr));
    TokenStream::from(quote! {
        #[test]
        #(#attrs)*
        #vis #sig {
            let limit = ::std::time::Duration::from_secs(#secs);
            let (done_tx, done_rx) = ::std::sync::mpsc::channel();
            ::std::thread::spawn(move || {
                let outcome = ::std::panic::catch_unwind(
                    ::std::panic::AssertUnwindSafe(move || #body),
                );
                let _ = done_tx.send(outcome);
            });
            match done_rx.recv_timeout(limit) {
                Ok(Ok(())) => {}
                Ok(Err(panic)) => ::std::panic::resume_unwind(panic),
                Err(::std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    panic!("test exceeded {}s", #secs)
                }
                Err(::std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    panic!("test thread exited without reporting")
                }
            }
        }
    })
}

fn path_is(attr: &Attribute, expected: &[&str]) -> bool {
    let segments = &attr.path().segments;
    segments.len() == expected.len()
        && segments
            .iter()
            .zip(expected)
            .all(|(segment, name)| segment.ident == *name)
}

fn is_plain_test(attr: &Attribute) -> bool {
    path_is(attr, &["test"])
}

fn is_tokio_test(attr: &Attribute) -> bool {
    path_is(attr, &["tokio", "test"])
}
