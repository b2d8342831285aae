use axum::{extract::FromRequestParts, http::request::Parts};

use crate::{error::AppError, state::room::PlayerId, sync::Identity};

/// Header carrying the caller's player identifier.
pub const PLAYER_ID_HEADER: &str = "x-player-id";
/// Header carrying the caller's display name.
pub const PLAYER_NAME_HEADER: &str = "x-player-name";

/// Identity facts the session layer attached to the request.
///
/// Missing headers yield an anonymous caller; engines then refuse every intent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Caller {
    player_id: Option<PlayerId>,
    display_name: String,
}

impl Caller {
    /// Caller built from explicit facts.
    pub fn new(player_id: Option<PlayerId>, display_name: impl Into<String>) -> Self {
        Self {
            player_id,
            display_name: display_name.into(),
        }
    }

    /// Player identifier, when signed in.
    pub fn player_id(&self) -> Option<&PlayerId> {
        self.player_id.as_ref()
    }

    fn from_parts(parts: &Parts) -> Result<Self, AppError> {
        let header = |name: &str| -> Result<Option<String>, AppError> {
            match parts.headers.get(name) {
                None => Ok(None),
                Some(value) => value
                    .to_str()
                    .map(|value| Some(value.trim().to_string()))
                    .map_err(|_| {
                        AppError::BadRequest(
                            "InvalidHeader",
                            format!("header `{name}` is not valid text"),
                        )
                    }),
            }
        };

        let player_id = header(PLAYER_ID_HEADER)?
            .filter(|value| !value.is_empty())
            .map(PlayerId::parse)
            .transpose()
            .map_err(|err| AppError::BadRequest("InvalidHeader", err.to_string()))?;
        let display_name = header(PLAYER_NAME_HEADER)?
            .filter(|value| !value.is_empty())
            .or_else(|| player_id.as_ref().map(ToString::to_string))
            .unwrap_or_default();

        Ok(Self {
            player_id,
            display_name,
        })
    }
}

impl Identity for Caller {
    fn current_player_id(&self) -> Option<PlayerId> {
        self.player_id.clone()
    }

    fn current_display_name(&self) -> String {
        self.display_name.clone()
    }

    fn is_signed_in(&self) -> bool {
        self.player_id.is_some()
    }
}

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Self::from_parts(parts)
    }
}

#[cfg(test)]
mod tests {
    use axum::http::Request;

    use super::*;

    fn parts(headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().uri("/rooms/r1");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn reads_identity_headers() {
        let caller = Caller::from_parts(&parts(&[
            (PLAYER_ID_HEADER, "p-1"),
            (PLAYER_NAME_HEADER, " Ada "),
        ]))
        .unwrap();
        assert!(caller.is_signed_in());
        assert_eq!(caller.player_id().unwrap().as_str(), "p-1");
        assert_eq!(caller.current_display_name(), "Ada");
    }

    #[test]
    fn name_defaults_to_player_id_and_missing_headers_are_anonymous() {
        let caller = Caller::from_parts(&parts(&[(PLAYER_ID_HEADER, "p-2")])).unwrap();
        assert_eq!(caller.current_display_name(), "p-2");

        let anonymous = Caller::from_parts(&parts(&[])).unwrap();
        assert!(!anonymous.is_signed_in());
        assert_eq!(anonymous.current_player_id(), None);
    }

    #[test]
    fn malformed_player_id_is_a_bad_request() {
        let err = Caller::from_parts(&parts(&[(PLAYER_ID_HEADER, "not valid!")])).unwrap_err();
        assert_eq!(err.code(), "InvalidHeader");
    }
}
