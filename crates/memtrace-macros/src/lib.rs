use proc_macro::TokenStream;
use quote::quote;
use syn::{Expr, ExprLit, ItemFn, Lit, LitStr, MetaNameValue, parse_macro_input};

/// Traces a `main`-like entry point.
///
/// Pushes a frame named after the function on the thread's tracer. With
/// `#[memtrace::main(output = "memtrace.out")]` the trace is first redirected
/// to that file, truncating it.
#[proc_macro_attribute]
pub fn main(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);

    let output = if attr.is_empty() {
        quote! { ::core::option::Option::None }
    } else {
        let arg = parse_macro_input!(attr as MetaNameValue);
        if !arg.path.is_ident("output") {
            return syn::Error::new_spanned(&arg.path, "expected `output = \"<path>\"`")
                .to_compile_error()
                .into();
        }
        match &arg.value {
            Expr::Lit(ExprLit {
                lit: Lit::Str(path),
                ..
            }) => quote! { ::core::option::Option::Some(#path) },
            other => {
                return syn::Error::new_spanned(other, "output must be a string literal")
                    .to_compile_error()
                    .into();
            }
        }
    };

    if let Some(asyncness) = &input.sig.asyncness {
        return unsupported_async(asyncness).into();
    }

    let attrs = &input.attrs;
    let vis = &input.vis;
    let sig = &input.sig;
    let block = &input.block;
    let name = sig.ident.to_string();

    quote! {
        #(#attrs)*
        #vis #sig {
            let _memtrace_frame = memtrace::local::enter_main(#name, #output);

            #block
        }
    }
    .into()
}

/// Pushes a frame for the duration of the function.
///
/// The frame is named after the function unless a label is given:
/// `#[memtrace::trace("parse")]`.
#[proc_macro_attribute]
pub fn trace(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);

    let label = if attr.is_empty() {
        input.sig.ident.to_string()
    } else {
        parse_macro_input!(attr as LitStr).value()
    };

    if let Some(asyncness) = &input.sig.asyncness {
        return unsupported_async(asyncness).into();
    }

    let attrs = &input.attrs;
    let vis = &input.vis;
    let sig = &input.sig;
    let block = &input.block;

    quote! {
        #(#attrs)*
        #vis #sig {
            let _memtrace_frame = memtrace::local::enter(#label);
            #block
        }
    }
    .into()
}

// Frames live on a thread-local stack, which cannot follow a future across
// `.await` points.
fn unsupported_async(asyncness: &syn::token::Async) -> proc_macro2::TokenStream {
    syn::Error::new_spanned(
        asyncness,
        "memtrace frames cannot span `.await`; trace the synchronous parts instead",
    )
    .to_compile_error()
}
