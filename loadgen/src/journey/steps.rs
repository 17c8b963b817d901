//! Synchronous journey steps
//!
//! Each step is a single request that must answer 200. Its duration is
//! recorded under the step name whenever a response arrives; a failure is
//! recorded once under the step's stage and aborts the iteration.

use serde_json::json;

use super::Journey;
use crate::api::{ApiRequest, ApiResponse, Transport, exchange, id_field};
use crate::error::JourneyError;
use crate::tracker::{ErrorEvent, JourneyStep, Stage};

const LOGIN_PATH: &str = "/api/v1/auth/normal/login";
const CHATS_PATH: &str = "/api/v1/chats";

impl<T: Transport> Journey<T> {
    /// Log in as a random test user and return the bearer token
    pub(super) async fn login(&mut self) -> Result<String, JourneyError> {
        let user = self
            .config
            .data
            .user(&mut self.rng)
            .cloned()
            .ok_or(JourneyError::NoUsers)?;

        let body = json!({
            "username": user.username,
            "password": user.password,
        });
        let response = self
            .step(
                JourneyStep::Login,
                &user.username,
                ApiRequest::post(LOGIN_PATH, Some(body)),
            )
            .await?;

        match response.bearer_token() {
            Some(token) => Ok(token.to_string()),
            None => Err(self.missing(JourneyStep::Login, &user.username, "Authorization")),
        }
    }

    /// Start a new chat and return its story id
    pub(super) async fn start_chat(&mut self, token: &str) -> Result<String, JourneyError> {
        let body = json!({
            "firstMessage": "안녕하세요! 새로운 이야기를 시작해볼까요?",
            "secondMessage": "어떤 종류의 이야기를 만들고 싶으세요?",
            "chatBranch": "READY",
            "bookType": "KOREAN",
            "secondaryLanguage": "KOREAN",
            "storyId": null,
        });
        let response = self
            .step(
                JourneyStep::ChatStart,
                "",
                ApiRequest::post(CHATS_PATH, Some(body)).bearer(token),
            )
            .await?;

        response
            .json()
            .ok()
            .and_then(|v| id_field(&v, "storyId"))
            .ok_or_else(|| self.missing(JourneyStep::ChatStart, "", "storyId"))
    }

    pub(super) async fn set_genre(
        &mut self,
        token: &str,
        story_id: &str,
    ) -> Result<(), JourneyError> {
        let genre = self.config.data.genre(&mut self.rng).to_string();
        self.choose(JourneyStep::GenreSet, token, story_id, "genre", genre)
            .await
    }

    pub(super) async fn set_theme(
        &mut self,
        token: &str,
        story_id: &str,
    ) -> Result<(), JourneyError> {
        let theme = self.config.data.theme(&mut self.rng).to_string();
        self.choose(JourneyStep::ThemeSet, token, story_id, "theme", theme)
            .await
    }

    pub(super) async fn send_message(
        &mut self,
        token: &str,
        story_id: &str,
    ) -> Result<(), JourneyError> {
        let content = self.config.data.message(&mut self.rng).to_string();
        let body = json!({ "content": content, "isSkip": false });
        self.step(
            JourneyStep::MessageSend,
            story_id,
            ApiRequest::post(format!("{CHATS_PATH}/{story_id}"), Some(body)).bearer(token),
        )
        .await
        .map(drop)
    }

    /// Pick one of the preset options for the chat (genre or theme)
    async fn choose(
        &mut self,
        step: JourneyStep,
        token: &str,
        story_id: &str,
        option: &str,
        content: String,
    ) -> Result<(), JourneyError> {
        let body = json!({ "content": content, "isDirectInput": false });
        self.step(
            step,
            story_id,
            ApiRequest::post(format!("{CHATS_PATH}/{story_id}/{option}"), Some(body)).bearer(token),
        )
        .await
        .map(drop)
    }

    async fn step(
        &mut self,
        step: JourneyStep,
        resource_id: &str,
        request: ApiRequest,
    ) -> Result<ApiResponse, JourneyError> {
        match exchange(self.generator.transport(), request, &mut self.log.telemetry).await {
            Ok(response) => {
                self.log.telemetry.record_stage(step.as_str(), response.elapsed);
                if response.status == 200 {
                    Ok(response)
                } else {
                    self.track(
                        step,
                        resource_id,
                        Some(response.status),
                        format!("{step} failed (status: {})", response.status),
                    );
                    Err(JourneyError::StepRejected {
                        step,
                        status: response.status,
                    })
                }
            }
            Err(source) => {
                self.track(step, resource_id, None, format!("{step} failed: {source}"));
                Err(JourneyError::Transport { step, source })
            }
        }
    }

    fn missing(
        &mut self,
        step: JourneyStep,
        resource_id: &str,
        field: &'static str,
    ) -> JourneyError {
        self.track(
            step,
            resource_id,
            Some(200),
            format!("{step} response is missing {field}"),
        );
        JourneyError::MissingField { step, field }
    }

    fn track(
        &mut self,
        step: JourneyStep,
        resource_id: &str,
        status: Option<u16>,
        message: String,
    ) {
        let now = self.generator.clock().now();
        self.log.errors.track(
            ErrorEvent::new(Stage::Step(step), resource_id, message).with_status(status),
            now,
        );
    }
}
