mod token;
mod user;

pub use token::ApiToken;
pub use user::UserId;
