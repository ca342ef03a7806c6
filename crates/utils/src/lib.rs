pub mod giturl;
pub mod posix;
