//! GraphQL documents for the auth operations

use serde_json::json;

use crate::transport::Operation;
use crate::types::Credentials;

const USER_FIELDS: &str =
    "id email role isActive emailVerified profile { firstName lastName phone avatar }";

const ENVELOPE_FIELDS: &str = "success message code timestamp";

pub const LOGIN_FIELD: &str = "login";
pub const REFRESH_FIELD: &str = "refreshToken";
pub const CURRENT_USER_FIELD: &str = "currentUser";

pub fn login(credentials: &Credentials) -> Operation {
    Operation::new(format!(
        "mutation Login($email: String!, $password: String!) {{ \
         login(email: $email, password: $password) {{ {ENVELOPE_FIELDS} \
         data {{ user {{ {USER_FIELDS} }} accessToken refreshToken }} }} }}"
    ))
    .operation_name("Login")
    .variables(json!({
        "email": credentials.email,
        "password": credentials.password,
    }))
}

pub fn logout() -> Operation {
    Operation::new(format!("mutation Logout {{ logout {{ {ENVELOPE_FIELDS} }} }}"))
        .operation_name("Logout")
}

pub fn refresh(refresh_token: &str) -> Operation {
    Operation::new(format!(
        "mutation RefreshToken($refreshToken: String!) {{ \
         refreshToken(refreshToken: $refreshToken) {{ {ENVELOPE_FIELDS} \
         data {{ accessToken refreshToken }} }} }}"
    ))
    .operation_name("RefreshToken")
    .variables(json!({ "refreshToken": refresh_token }))
}

pub fn current_user() -> Operation {
    Operation::new(format!(
        "query CurrentUser {{ currentUser {{ {ENVELOPE_FIELDS} \
         data {{ user {{ {USER_FIELDS} }} }} }} }}"
    ))
    .operation_name("CurrentUser")
}
