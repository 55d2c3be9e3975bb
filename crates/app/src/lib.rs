pub mod observables;
pub mod runtime;
pub mod teardown;

pub use observables::CallObservables;
pub use runtime::CallRuntime;
