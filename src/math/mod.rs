pub mod ordinal_probit;
pub mod probit;
