use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        dto::{
            CurrentUserResponse, ForgotPasswordRequest, LoginRequest, MessageResponse,
            RegisterRequest, ResetPasswordRequest, UserResponse, VerifyEmailParams,
        },
        password::{hash_password, verify_password},
        repo::{is_unique_violation, Role, User},
        reset, session,
        session::{CurrentUser, MaybeUser, Session},
        verification,
    },
    csrf,
    error::{ApiError, ValidationErrors},
    events::AuthEvent,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/user", get(current_user))
        .route("/email/verify", get(verify_email_get).post(verify_email_post))
        .route("/email/verification-notification", post(resend_verification))
        .route("/forgot-password", post(forgot_password))
        .route("/reset-password", post(reset_password))
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

const EMAIL_TAKEN: &str = "The email has already been taken.";
const BAD_CREDENTIALS: &str = "The provided credentials are incorrect.";

fn validate_registration(payload: &RegisterRequest) -> Result<Role, ValidationErrors> {
    let mut errors = ValidationErrors::new();

    if payload.name.trim().is_empty() {
        errors.add("name", "The name field is required.");
    } else if payload.name.len() > 255 {
        errors.add("name", "The name must not be greater than 255 characters.");
    }

    if payload.email.is_empty() {
        errors.add("email", "The email field is required.");
    } else if !is_valid_email(&payload.email) {
        errors.add("email", "The email must be a valid email address.");
    } else if payload.email.len() > 255 {
        errors.add("email", "The email must not be greater than 255 characters.");
    }

    if payload.password.len() < 8 {
        errors.add("password", "The password must be at least 8 characters.");
    }
    if payload.password != payload.password_confirmation {
        errors.add("password", "The password confirmation does not match.");
    }

    let role = match payload.role.as_deref() {
        None => Role::Customer,
        Some(value) => value.parse().unwrap_or_else(|_| {
            errors.add("role", "The selected role is invalid.");
            Role::Customer
        }),
    };

    if errors.is_empty() {
        Ok(role)
    } else {
        Err(errors)
    }
}

#[instrument(skip(state, jar, payload))]
async fn register(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, CookieJar, Json<UserResponse>), ApiError> {
    let role = validate_registration(&payload).map_err(ApiError::Validation)?;

    if User::find_by_email(&state.db, &payload.email).await?.is_some() {
        warn!(email = %payload.email, "registration with taken email");
        return Err(ApiError::Validation(ValidationErrors::of("email", EMAIL_TAKEN)));
    }

    let hash = hash_password(&payload.password)?;
    let user = match User::create(&state.db, payload.name.trim(), &payload.email, &hash, role).await
    {
        Ok(user) => user,
        // Lost a race against a concurrent registration on the same email;
        // reported exactly like the pre-check failure.
        Err(e) if is_unique_violation(&e) => {
            warn!(email = %payload.email, "registration raced on unique email");
            return Err(ApiError::Validation(ValidationErrors::of("email", EMAIL_TAKEN)));
        }
        Err(e) => return Err(e.into()),
    };

    verification::send_verification_email(
        state.mailer.clone(),
        &state.config.frontend_url,
        user.id,
        &user.email,
        &user.name,
    );

    let jar = session::establish(&state, jar, user.id).await?;

    info!(user_id = %user.id, email = %user.email, "user registered");
    Ok((
        StatusCode::CREATED,
        jar,
        Json(UserResponse {
            message: "User registered successfully. Please check your email to verify your account."
                .into(),
            user,
        }),
    ))
}

fn validate_login(payload: &LoginRequest) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();
    if payload.email.is_empty() {
        errors.add("email", "The email field is required.");
    }
    if payload.password.is_empty() {
        errors.add("password", "The password field is required.");
    }
    errors.into_result()
}

#[instrument(skip(state, jar, payload))]
async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<LoginRequest>,
) -> Result<(CookieJar, Json<UserResponse>), ApiError> {
    validate_login(&payload).map_err(ApiError::Validation)?;

    // Unknown email and wrong password take the same path out, so the
    // response never confirms whether an account exists.
    let user = User::find_by_email(&state.db, &payload.email).await?;
    let authenticated = match &user {
        Some(user) => verify_password(&payload.password, &user.password_hash)?,
        None => false,
    };
    let Some(user) = user.filter(|_| authenticated) else {
        warn!(email = %payload.email, "login rejected");
        return Err(ApiError::Validation(ValidationErrors::of("email", BAD_CREDENTIALS)));
    };

    let jar = session::establish(&state, jar, user.id).await?;

    info!(user_id = %user.id, "user logged in");
    Ok((
        jar,
        Json(UserResponse {
            message: "Login successful".into(),
            user,
        }),
    ))
}

#[instrument(skip(state, jar))]
async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<MessageResponse>), ApiError> {
    let jar = session::destroy(&state, jar).await?;
    // fresh anti-forgery token for the now-anonymous browser
    let jar = csrf::issue(jar);
    info!("user logged out");
    Ok((jar, Json(MessageResponse::new("Logged out successfully"))))
}

#[instrument(skip_all)]
async fn current_user(MaybeUser(user): MaybeUser) -> Json<CurrentUserResponse> {
    Json(CurrentUserResponse { user })
}

async fn verify_email_get(
    State(state): State<AppState>,
    Query(params): Query<VerifyEmailParams>,
) -> Result<Json<MessageResponse>, ApiError> {
    verify_email(state, params).await
}

async fn verify_email_post(
    State(state): State<AppState>,
    Json(params): Json<VerifyEmailParams>,
) -> Result<Json<MessageResponse>, ApiError> {
    verify_email(state, params).await
}

#[instrument(skip(state))]
async fn verify_email(
    state: AppState,
    params: VerifyEmailParams,
) -> Result<Json<MessageResponse>, ApiError> {
    let user = User::find_by_id(&state.db, params.id)
        .await?
        .ok_or(ApiError::NotFound)?;

    if !verification::hash_matches(user.id, &user.email, &params.hash) {
        warn!(user_id = %user.id, "verification hash mismatch");
        return Err(ApiError::InvalidLink("Invalid verification link".into()));
    }

    if user.is_verified() {
        return Ok(Json(MessageResponse::new("Email already verified")));
    }

    User::mark_verified(&state.db, user.id).await?;
    state.events.emit(AuthEvent::EmailVerified { user_id: user.id });

    info!(user_id = %user.id, "email verified");
    Ok(Json(MessageResponse::new("Email verified successfully")))
}

#[instrument(skip(state, user))]
async fn resend_verification(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<MessageResponse>, ApiError> {
    if user.is_verified() {
        return Ok(Json(MessageResponse::new("Email already verified")));
    }

    verification::send_verification_email(
        state.mailer.clone(),
        &state.config.frontend_url,
        user.id,
        &user.email,
        &user.name,
    );

    info!(user_id = %user.id, "verification email resent");
    Ok(Json(MessageResponse::new("Verification email sent successfully")))
}

#[instrument(skip(state, payload))]
async fn forgot_password(
    State(state): State<AppState>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let mut errors = ValidationErrors::new();
    if payload.email.is_empty() {
        errors.add("email", "The email field is required.");
    } else if !is_valid_email(&payload.email) {
        errors.add("email", "The email must be a valid email address.");
    }
    errors.into_result().map_err(ApiError::Validation)?;

    if User::find_by_email(&state.db, &payload.email).await?.is_some() {
        let token = reset::create_token(&state.db, &payload.email).await?;
        reset::send_reset_email(
            state.mailer.clone(),
            &state.config.frontend_url,
            &token,
            &payload.email,
        );
        info!("password reset link issued");
    }

    // Uniform response whether or not the account exists.
    Ok(Json(MessageResponse::new(
        "If your email address exists in our records, a password reset link has been sent.",
    )))
}

fn validate_reset(payload: &ResetPasswordRequest) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();
    if payload.token.is_empty() {
        errors.add("token", "The token field is required.");
    }
    if payload.email.is_empty() {
        errors.add("email", "The email field is required.");
    } else if !is_valid_email(&payload.email) {
        errors.add("email", "The email must be a valid email address.");
    }
    if payload.password.len() < 8 {
        errors.add("password", "The password must be at least 8 characters.");
    }
    if payload.password != payload.password_confirmation {
        errors.add("password", "The password confirmation does not match.");
    }
    errors.into_result()
}

#[instrument(skip(state, payload))]
async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    validate_reset(&payload).map_err(ApiError::Validation)?;

    let ttl = time::Duration::minutes(state.config.reset_ttl_minutes);
    let consumed = reset::consume_token(&state.db, &payload.email, &payload.token, ttl).await?;
    let user = User::find_by_email(&state.db, &payload.email).await?;

    // One generic failure for unknown token, wrong email, expiry or a
    // vanished account. No oracle for token guessing.
    let (true, Some(user)) = (consumed, user) else {
        warn!("password reset rejected");
        return Err(ApiError::InvalidLink("Unable to reset password".into()));
    };

    let hash = hash_password(&payload.password)?;
    User::update_password(&state.db, user.id, &hash).await?;
    // the session-store equivalent of rotating a remember-me token
    Session::delete_for_user(&state.db, user.id).await?;
    state.events.emit(AuthEvent::PasswordReset { user_id: user.id });

    info!(user_id = %user.id, "password reset");
    Ok(Json(MessageResponse::new("Password reset successfully")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register_payload() -> RegisterRequest {
        RegisterRequest {
            name: "Ada Lovelace".into(),
            email: "ada@example.com".into(),
            password: "password123".into(),
            password_confirmation: "password123".into(),
            role: None,
        }
    }

    #[test]
    fn registration_accepts_valid_payload_with_default_role() {
        let role = validate_registration(&register_payload()).expect("valid");
        assert_eq!(role, Role::Customer);
    }

    #[test]
    fn registration_accepts_each_known_role() {
        for (value, expected) in [
            ("admin", Role::Admin),
            ("vendor", Role::Vendor),
            ("customer", Role::Customer),
        ] {
            let mut payload = register_payload();
            payload.role = Some(value.into());
            assert_eq!(validate_registration(&payload).expect("valid"), expected);
        }
    }

    #[test]
    fn registration_rejects_unknown_role() {
        let mut payload = register_payload();
        payload.role = Some("superuser".into());
        let errors = validate_registration(&payload).unwrap_err();
        let json = serde_json::to_value(&errors).unwrap();
        assert_eq!(json["role"][0], "The selected role is invalid.");
    }

    #[test]
    fn registration_rejects_blank_name_and_bad_email() {
        let mut payload = register_payload();
        payload.name = "   ".into();
        payload.email = "not-an-email".into();
        let errors = validate_registration(&payload).unwrap_err();
        let json = serde_json::to_value(&errors).unwrap();
        assert_eq!(json["name"][0], "The name field is required.");
        assert_eq!(json["email"][0], "The email must be a valid email address.");
    }

    #[test]
    fn registration_rejects_overlong_name() {
        let mut payload = register_payload();
        payload.name = "x".repeat(256);
        let errors = validate_registration(&payload).unwrap_err();
        let json = serde_json::to_value(&errors).unwrap();
        assert_eq!(
            json["name"][0],
            "The name must not be greater than 255 characters."
        );
    }

    #[test]
    fn registration_rejects_short_or_mismatched_password() {
        let mut payload = register_payload();
        payload.password = "short".into();
        payload.password_confirmation = "different".into();
        let errors = validate_registration(&payload).unwrap_err();
        let json = serde_json::to_value(&errors).unwrap();
        assert_eq!(json["password"][0], "The password must be at least 8 characters.");
        assert_eq!(json["password"][1], "The password confirmation does not match.");
    }

    #[test]
    fn login_requires_presence_only() {
        let ok = LoginRequest {
            email: "whatever".into(),
            password: "x".into(),
        };
        assert!(validate_login(&ok).is_ok());

        let missing = LoginRequest {
            email: String::new(),
            password: String::new(),
        };
        let errors = validate_login(&missing).unwrap_err();
        let json = serde_json::to_value(&errors).unwrap();
        assert_eq!(json["email"][0], "The email field is required.");
        assert_eq!(json["password"][0], "The password field is required.");
    }

    #[test]
    fn reset_validation_requires_token_email_and_strong_password() {
        let payload = ResetPasswordRequest {
            token: String::new(),
            email: "bad".into(),
            password: "short".into(),
            password_confirmation: "other".into(),
        };
        let errors = validate_reset(&payload).unwrap_err();
        let json = serde_json::to_value(&errors).unwrap();
        assert_eq!(json["token"][0], "The token field is required.");
        assert_eq!(json["email"][0], "The email must be a valid email address.");
        assert_eq!(json["password"][0], "The password must be at least 8 characters.");
    }

    #[test]
    fn reset_validation_accepts_complete_payload() {
        let payload = ResetPasswordRequest {
            token: "tok".into(),
            email: "ada@example.com".into(),
            password: "password123".into(),
            password_confirmation: "password123".into(),
        };
        assert!(validate_reset(&payload).is_ok());
    }

    #[test]
    fn email_regex_matches_common_shapes() {
        assert!(is_valid_email("a@b.com"));
        assert!(is_valid_email("first.last+tag@sub.domain.io"));
        assert!(!is_valid_email("missing-at.com"));
        assert!(!is_valid_email("spaces in@example.com"));
        assert!(!is_valid_email("a@nodot"));
    }
}
