//! Token builders for each generated source file.
//!
//! This is the only codegen file that depends on proc_macro2/quote.

use proc_macro2::{Ident, Literal, Span, TokenStream};
use quote::quote;

use crate::error::{Error, Result};
use crate::kernels::KernelRef;

use super::CodegenInput;

/// Path of the runtime module that exports every kernel class.
const KERNEL_MODULE: &str = "micro_engine::ops";

fn usize_lit(v: usize) -> Literal {
    Literal::usize_unsuffixed(v)
}

/// A section embedded byte-for-byte.
pub fn render_section(doc: &str, symbol: &str, bytes: &[u8]) -> TokenStream {
    let data = Ident::new(symbol, Span::call_site());
    let size = Ident::new(&format!("{symbol}_SIZE"), Span::call_site());
    let len = usize_lit(bytes.len());
    let literal = Literal::byte_string(bytes);

    quote! {
        #![doc = #doc]

        use crate::AlignedBytes;

        pub const #size: usize = #len;

        pub static #data: AlignedBytes<#size> = AlignedBytes(*#literal);
    }
}

pub fn render_engine_config(input: &CodegenInput) -> TokenStream {
    let tensor_mem = usize_lit(input.layout.tensor_mem_size);
    let scratch = usize_lit(input.layout.scratch_buffer_size);
    let inputs = usize_lit(input.input_size);

    quote! {
        //! Engine parameters and the arenas handed to the runtime.

        use core::ptr::addr_of_mut;
        use core::sync::atomic::{AtomicBool, Ordering};

        use micro_engine::EngineConfig;

        use crate::graph_data::GRAPH_DATA;
        use crate::model_data::MODEL_DATA;
        use crate::net_def_data::NET_DEF_DATA;
        use crate::AlignedBytes;

        pub const TENSOR_MEM_SIZE: usize = #tensor_mem;
        pub const INPUT_SIZE: usize = #inputs;
        pub const SCRATCH_BUFFER_SIZE: usize = #scratch;

        static mut TENSOR_MEM: AlignedBytes<TENSOR_MEM_SIZE> = AlignedBytes([0; TENSOR_MEM_SIZE]);
        static mut SCRATCH_BUFFER: AlignedBytes<SCRATCH_BUFFER_SIZE> =
            AlignedBytes([0; SCRATCH_BUFFER_SIZE]);
        static TAKEN: AtomicBool = AtomicBool::new(false);

        /// Engine configuration over the static arenas. Returns `None` once the
        /// arenas have been handed out.
        pub fn engine_config() -> Option<EngineConfig<'static>> {
            if TAKEN.swap(true, Ordering::AcqRel) {
                return None;
            }
            // SAFETY: `TAKEN` guarantees the arenas are borrowed at most once.
            let (tensor_mem, scratch_buffer) = unsafe {
                (
                    &mut (*addr_of_mut!(TENSOR_MEM)).0[..],
                    &mut (*addr_of_mut!(SCRATCH_BUFFER)).0[..],
                )
            };
            Some(EngineConfig {
                net_def: &NET_DEF_DATA.0,
                graph_data: &GRAPH_DATA.0,
                model_data: &MODEL_DATA.0,
                tensor_mem,
                scratch_buffer,
                input_size: INPUT_SIZE,
            })
        }
    }
}

/// Static name of a kernel instance, e.g. `Conv2dRefOp` -> `CONV2D_REF_OP`.
pub fn kernel_static_name(class_name: &str) -> String {
    let mut out = String::with_capacity(class_name.len() + 4);
    let mut prev_lower = false;
    for c in class_name.chars() {
        if c.is_ascii_uppercase() && prev_lower {
            out.push('_');
        }
        prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
        out.push(c.to_ascii_uppercase());
    }
    out
}

pub fn render_ops_list(sources: &[&str], kernels: &[KernelRef]) -> Result<TokenStream> {
    let num_sources = usize_lit(sources.len());
    let num_kernels = usize_lit(kernels.len());

    let mut statics = Vec::with_capacity(kernels.len());
    let mut refs = Vec::with_capacity(kernels.len());
    for kernel in kernels {
        let path: syn::Path = syn::parse_str(&format!("{KERNEL_MODULE}::{}", kernel.class_name))
            .map_err(|e| {
                Error::Codegen(format!("invalid kernel class '{}': {e}", kernel.class_name))
            })?;
        let ident = Ident::new(&kernel_static_name(kernel.class_name), Span::call_site());
        statics.push(quote! {
            static #ident: #path = #path::new();
        });
        refs.push(quote!(&#ident));
    }

    Ok(quote! {
        //! Kernels used by this model, indexed by kernel id.

        use micro_engine::Operator;

        /// Runtime sources the kernels are built from.
        pub const KERNEL_SOURCES: [&str; #num_sources] = [#(#sources),*];

        #(#statics)*

        pub static KERNELS: [&(dyn Operator + Sync); #num_kernels] = [#(#refs),*];
    })
}

pub fn render_engine_factory(factory: &Ident) -> TokenStream {
    quote! {
        //! Engine construction entry point.

        use micro_engine::{Engine, EngineError};

        use crate::engine_config::engine_config;
        use crate::ops_list::KERNELS;

        /// Build the engine over the static arenas. Fails if called twice.
        pub fn #factory() -> Result<Engine<'static>, EngineError> {
            let config = engine_config().ok_or(EngineError::AlreadyInitialized)?;
            Engine::new(config, &KERNELS)
        }
    }
}

pub fn render_c_interface(factory: &Ident, init: &Ident) -> TokenStream {
    quote! {
        //! C entry points.

        use micro_engine::ffi::{publish_engine, EngineHandle};

        use crate::engine_factory::#factory;

        /// Initialize the engine and store its handle in `*handle`.
        /// Returns 0 on success, otherwise the runtime's error code.
        ///
        /// # Safety
        ///
        /// `handle` must be null or valid for writes.
        #[no_mangle]
        pub unsafe extern "C" fn #init(handle: *mut EngineHandle) -> i32 {
            if handle.is_null() {
                return -1;
            }
            match #factory() {
                Ok(engine) => {
                    *handle = publish_engine(engine);
                    0
                }
                Err(err) => err.code(),
            }
        }
    }
}

pub fn render_lib(model_name: &str) -> TokenStream {
    let doc = format!(" Generated `{model_name}` model for the micro_engine runtime.");
    quote! {
        #![doc = #doc]
        #![no_std]

        pub mod c_interface;
        pub mod engine_config;
        pub mod engine_factory;
        pub mod graph_data;
        pub mod model_data;
        pub mod net_def_data;
        pub mod ops_list;

        /// Byte array aligned for the runtime's word-sized reads.
        #[repr(C, align(8))]
        pub struct AlignedBytes<const N: usize>(pub [u8; N]);
    }
}
