//! Procedural macros shared across the rasterloom workspace.
//!
//! Currently this is only the [`macro@context`] attribute, which decorates a
//! `Result`-returning function so that any error it produces carries a
//! formatted context message.

use proc_macro::TokenStream;
use proc_macro2::{TokenStream as TokenStream2, TokenTree};
use quote::{ToTokens, quote};
use syn::parse_macro_input;

/// Attaches a formatted context message to every error returned by the
/// function.
///
/// The attribute takes `format!`-style arguments, which may refer to the
/// function's parameters:
///
/// ```ignore
/// #[context("opening raster '{}'", path.display())]
/// fn open(path: &Path) -> Result<Raster> { ... }
/// ```
///
/// Works on sync and `async` functions. Prefix the arguments with `move,`
/// when captured values should be moved into the generated wrapper.
#[proc_macro_attribute]
pub fn context(args: TokenStream, input: TokenStream) -> TokenStream {
	let (capture, message) = match split_capture_prefix(args.into()) {
		Ok(parts) => parts,
		Err(err) => return err.to_compile_error().into(),
	};
	let mut func = parse_macro_input!(input as syn::ItemFn);

	let wrapped = if func.sig.asyncness.is_some() {
		// the awaited block needs its concrete Result type spelled out, or
		// inference cannot resolve the error conversions inside the body
		let syn::ReturnType::Type(_, result_ty) = &func.sig.output else {
			return syn::Error::new_spanned(&func.sig, "#[context] requires an explicit Result return type")
				.to_compile_error()
				.into();
		};
		let body = &func.block;
		quote! {
			let __context_result: #result_ty = async #capture { #body }.await;
			match __context_result {
				::core::result::Result::Ok(__context_value) => ::core::result::Result::Ok(__context_value),
				::core::result::Result::Err(__context_cause) => {
					::core::result::Result::Err(__context_cause.context(format!(#message)).into())
				}
			}
		}
	} else {
		let output = &func.sig.output;
		let body = &func.block;
		quote! {
			match (#capture || #output #body)() {
				::core::result::Result::Ok(__context_value) => ::core::result::Result::Ok(__context_value),
				::core::result::Result::Err(__context_cause) => {
					::core::result::Result::Err(__context_cause.context(format!(#message)).into())
				}
			}
		}
	};
	func.block = Box::new(syn::parse_quote!({ #wrapped }));

	func.into_token_stream().into()
}

/// Splits an optional leading `move,` off the attribute arguments; whatever
/// remains are the `format!` arguments of the context message.
fn split_capture_prefix(args: TokenStream2) -> syn::Result<(TokenStream2, TokenStream2)> {
	let tokens: Vec<TokenTree> = args.into_iter().collect();
	match tokens.first() {
		Some(TokenTree::Ident(ident)) if ident == "move" => match tokens.get(1) {
			Some(TokenTree::Punct(punct)) if punct.as_char() == ',' => {
				Ok((quote!(move), tokens.into_iter().skip(2).collect()))
			}
			_ => Err(syn::Error::new(ident.span(), "expected `,` after `move`")),
		},
		_ => Ok((TokenStream2::new(), tokens.into_iter().collect())),
	}
}
