pub mod parser;
pub mod settings;
pub mod types;
pub mod validator;
