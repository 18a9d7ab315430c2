//! # microrpc procedural macros
//!
//! ## `#[service]`
//!
//! Turns a trait into an RPC service definition:
//!
//! ```rust,ignore
//! #[microrpc::service(name = "user-service")]
//! pub trait UserService {
//!     async fn get_by_id(&self, ctx: &Context, req: &GetByIdReq) -> Result<GetByIdRsp>;
//! }
//! ```
//!
//! Every method must take `&self`, a `&Context` and one request reference,
//! and return `Result<Rsp>`. The macro generates:
//!
//! 1. the trait itself, with `Send` futures and a `NAME` constant holding the
//!    service name (the `name` attribute, or the trait name);
//! 2. a `microrpc_export` method that registers an implementation with a
//!    `Router`;
//! 3. a `{Trait}Client` stub that implements the trait by calling the remote
//!    service, plus a `{method}_with` variant per method that takes
//!    `CallOptions` and returns the full `Reply`.

use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{
    FnArg, GenericArgument, ItemTrait, LitStr, PathArguments, ReturnType, TraitItem, TraitItemFn,
    Type, parse_macro_input, spanned::Spanned,
};

const RESERVED: [&str; 1] = ["microrpc_export"];

/// Defines an RPC service trait. See the crate docs for the generated items.
#[proc_macro_attribute]
pub fn service(attr: TokenStream, input: TokenStream) -> TokenStream {
    let mut name: Option<LitStr> = None;
    let attr_parser = syn::meta::parser(|meta| {
        if meta.path.is_ident("name") {
            name = Some(meta.value()?.parse()?);
            Ok(())
        } else {
            Err(meta.error("unsupported service attribute, expected `name = \"...\"`"))
        }
    });
    parse_macro_input!(attr with attr_parser);
    let input = parse_macro_input!(input as ItemTrait);

    expand(name, input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

struct ServiceMethod {
    item: TraitItemFn,
    ctx_type: Type,
    req_type: Type,
    req_inner: Type,
    output: Type,
    rsp_type: Type,
}

fn parse_method(item: &TraitItem) -> syn::Result<ServiceMethod> {
    const FORM: &str =
        "the function should be in the form `async fn func(&self, ctx: &Context, req: &Req) -> Result<Rsp>`";

    let TraitItem::Fn(method) = item else {
        return Err(syn::Error::new(item.span(), "only methods are allowed in a service"));
    };
    let sig = &method.sig;
    if RESERVED.iter().any(|r| sig.ident == r) {
        return Err(syn::Error::new(
            sig.ident.span(),
            format!("the function cannot be named `{}`", sig.ident),
        ));
    }
    if method.default.is_some() || !sig.generics.params.is_empty() {
        return Err(syn::Error::new(sig.span(), FORM));
    }

    if sig.asyncness.is_some()
        && sig.inputs.len() == 3
        && let Some(FnArg::Receiver(receiver)) = sig.inputs.first()
        && receiver.reference.is_some()
        && receiver.mutability.is_none()
        && let FnArg::Typed(ctx) = &sig.inputs[1]
        && let FnArg::Typed(req) = &sig.inputs[2]
        && let Type::Reference(req_ref) = &*req.ty
        && let ReturnType::Type(_, output) = &sig.output
        && let Some(rsp_type) = result_value_type(output)
    {
        Ok(ServiceMethod {
            item: method.clone(),
            ctx_type: (*ctx.ty).clone(),
            req_type: (*req.ty).clone(),
            req_inner: (*req_ref.elem).clone(),
            output: (**output).clone(),
            rsp_type,
        })
    } else {
        Err(syn::Error::new(sig.span(), FORM))
    }
}

/// Extracts `T` from `Result<T>` or `path::Result<T>`.
fn result_value_type(ty: &Type) -> Option<Type> {
    let Type::Path(path) = ty else {
        return None;
    };
    let last = path.path.segments.last()?;
    if last.ident != "Result" {
        return None;
    }
    let PathArguments::AngleBracketed(args) = &last.arguments else {
        return None;
    };
    match args.args.first()? {
        GenericArgument::Type(ty) => Some(ty.clone()),
        _ => None,
    }
}

fn expand(name: Option<LitStr>, input: ItemTrait) -> syn::Result<proc_macro2::TokenStream> {
    let krate = get_crate_name();
    let trait_ident = &input.ident;
    let visibility = &input.vis;
    let attrs = &input.attrs;
    let service_name = name.map_or_else(|| trait_ident.to_string(), |lit| lit.value());
    let client_ident = format_ident!("{}Client", trait_ident);

    let methods = input
        .items
        .iter()
        .map(parse_method)
        .collect::<syn::Result<Vec<_>>>()?;

    let mut trait_methods = vec![];
    let mut export_branches = vec![];
    let mut client_methods = vec![];
    let mut client_with_methods = vec![];

    for method in &methods {
        let ServiceMethod {
            item,
            ctx_type,
            req_type,
            req_inner,
            output,
            rsp_type,
        } = method;
        let method_ident = &item.sig.ident;
        let method_name = method_ident.to_string();
        let method_attrs = &item.attrs;
        let inputs = &item.sig.inputs;

        trait_methods.push(quote! {
            #(#method_attrs)*
            fn #method_ident(#inputs) -> impl ::core::future::Future<Output = #output> + ::core::marker::Send;
        });

        export_branches.push(quote! {
            let this = self.clone();
            router.add_method(
                <Self as #trait_ident>::NAME,
                #method_name,
                move |ctx: #krate::Context, req: #req_inner| {
                    let this = this.clone();
                    async move { this.#method_ident(&ctx, &req).await }
                },
            );
        });

        client_methods.push(quote! {
            async fn #method_ident(&self, ctx: #ctx_type, req: #req_type) -> #output {
                self.client
                    .call(ctx, <Self as #trait_ident>::NAME, #method_name, req)
                    .await
            }
        });

        let with_ident = format_ident!("{}_with", method_ident);
        let doc = format!("Calls `{method_name}` with explicit options, returning the full reply.");
        client_with_methods.push(quote! {
            #[doc = #doc]
            pub async fn #with_ident(
                &self,
                ctx: #ctx_type,
                req: #req_type,
                opts: #krate::CallOptions,
            ) -> #krate::Result<#krate::Reply<#rsp_type>> {
                self.client
                    .invoke(ctx, <Self as #trait_ident>::NAME, #method_name, req, opts)
                    .await
            }
        });
    }

    let client_doc = format!("Client stub for the `{service_name}` service.");

    Ok(quote! {
        #(#attrs)*
        #visibility trait #trait_ident {
            const NAME: &'static str = #service_name;

            #(#trait_methods)*

            /// Registers every method of this service with `router`.
            fn microrpc_export(self: ::std::sync::Arc<Self>, router: &mut #krate::Router)
            where
                Self: ::core::marker::Sized + ::core::marker::Send + ::core::marker::Sync + 'static,
            {
                #(#export_branches)*
            }
        }

        #[doc = #client_doc]
        #visibility struct #client_ident<C = #krate::tcp::TcpStream> {
            client: #krate::Client<C>,
        }

        impl<C> ::core::clone::Clone for #client_ident<C> {
            fn clone(&self) -> Self {
                Self {
                    client: self.client.clone(),
                }
            }
        }

        impl<C> ::core::fmt::Debug for #client_ident<C> {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                f.debug_struct(stringify!(#client_ident))
                    .field("client", &self.client)
                    .finish()
            }
        }

        impl<C> #client_ident<C> {
            pub fn new(client: #krate::Client<C>) -> Self {
                Self { client }
            }

            pub fn client(&self) -> &#krate::Client<C> {
                &self.client
            }
        }

        impl<C: #krate::Connection> #client_ident<C> {
            #(#client_with_methods)*
        }

        impl<C: #krate::Connection> #trait_ident for #client_ident<C> {
            #(#client_methods)*
        }
    })
}

/// Resolves the path of the `microrpc` crate as seen from the caller.
fn get_crate_name() -> proc_macro2::TokenStream {
    match proc_macro_crate::crate_name("microrpc") {
        Ok(proc_macro_crate::FoundCrate::Name(name)) => {
            let ident = syn::Ident::new(&name, proc_macro2::Span::call_site());
            quote! { ::#ident }
        }
        _ => quote! { ::microrpc },
    }
}
