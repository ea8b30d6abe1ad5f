pub mod archiver;
pub mod validator;
