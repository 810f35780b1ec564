// Browser console on wasm32, `tracing` everywhere else (unit tests, native tools).
// The imported JS functions panic when called off-wasm, hence the split.

#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen]
extern "C" {
    // Use `js_namespace` to bind `console.log(..)` instead of just `log(..)`
    #[wasm_bindgen(js_namespace = console)]
    pub fn log(s: &str);

    #[wasm_bindgen(js_namespace = console)]
    pub fn warn(s: &str);
}

#[cfg(not(target_arch = "wasm32"))]
pub fn log(s: &str) {
    tracing::debug!(target: "geolayer", "{}", s);
}

#[cfg(not(target_arch = "wasm32"))]
pub fn warn(s: &str) {
    tracing::warn!(target: "geolayer", "{}", s);
}

// Note: The console_log / console_warn macros are defined in lib.rs
