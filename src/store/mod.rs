pub mod script_store;
