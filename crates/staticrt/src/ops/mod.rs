//! Operator layer: CPU kernels and the static op registry the dispatcher and
//! memory planner classify nodes with.

pub mod kernels;
pub mod registry;

pub use registry::{
    can_reuse_inputs, can_reuse_inputs_outputs, can_reuse_outputs, can_run_natively,
    get_native_operation, get_out_of_place_operation, has_operation, has_out_variant, is_view_op,
    OpFn,
};
