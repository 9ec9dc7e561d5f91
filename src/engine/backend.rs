// Sommaii Chat Engine — HTTP backend
// reqwest implementation of ChatBackend against the chatbot REST/SSE API,
// plus the login/logout calls used by the CLI.
//
// Ordinary REST calls go through `send_authed`: when the backend rejects the
// access token with `detail.code == "token_expired"`, the stored refresh token
// is exchanged once and the request is replayed. The question stream is not
// wrapped; the session controller refreshes proactively before opening it.

use crate::atoms::constants::{
    AUTH_LOGIN_PATH, AUTH_LOGOUT_PATH, AUTH_REFRESH_PATH, CHATS_PATH, CHAT_ROOMS_PATH,
    QUESTION_PATH, RETRIEVAL_PATH,
};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::traits::{ChatBackend, QuestionStream};
use crate::atoms::types::{
    ChatRoom, LoginRequest, QuestionRequest, RateChatRequest, RefreshRequest, RenameRoomRequest,
    RetrievalRequest, RetrievalResponse, StoredChat, TokenPair,
};
use crate::engine::auth::TokenStore;
use crate::engine::config::ClientConfig;
use crate::engine::http::{self, is_token_expired, parse_api_error};
use crate::engine::sse;
use async_trait::async_trait;
use futures::StreamExt;
use log::{debug, info, warn};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use url::Url;

pub struct HttpBackend {
    rest: Client,
    stream: Client,
    base: Url,
    tokens: Arc<TokenStore>,
}

impl HttpBackend {
    pub fn new(config: &ClientConfig, tokens: Arc<TokenStore>) -> EngineResult<Self> {
        Ok(HttpBackend {
            rest: http::rest_client(config)?,
            stream: http::stream_client(config)?,
            base: config.base_url()?,
            tokens,
        })
    }

    /// The store this backend reads and refreshes; sessions share it.
    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    fn endpoint(&self, path: &str) -> EngineResult<Url> {
        Ok(self.base.join(path)?)
    }

    /// `<collection>/<id>` with the id percent-encoded as one path segment.
    fn item(&self, collection: &str, id: &str) -> EngineResult<Url> {
        self.endpoint(&format!("{}{}", collection, urlencoding::encode(id)))
    }

    /// Sign in and store the returned token pair.
    pub async fn login(&self, email: &str, password: &str) -> EngineResult<()> {
        let url = self.endpoint(AUTH_LOGIN_PATH)?;
        let body = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let resp = self.rest.post(url).json(&body).send().await?;
        let pair: TokenPair = read_json(resp).await?;
        self.tokens.replace(pair);
        info!("[auth] Signed in as {}", email);
        Ok(())
    }

    /// Revoke the refresh token server-side, then forget both tokens.
    /// Local tokens are cleared even when the backend call fails.
    pub async fn logout(&self) -> EngineResult<()> {
        let Some(refresh_token) = self.tokens.refresh_token() else {
            self.tokens.clear();
            return Ok(());
        };
        let url = self.endpoint(AUTH_LOGOUT_PATH)?;
        let result = match self
            .rest
            .post(url)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await
        {
            Ok(resp) => check(resp).await.map(|_| ()),
            Err(e) => Err(EngineError::from(e)),
        };
        self.tokens.clear();
        if let Err(ref e) = result {
            warn!("[auth] Backend logout failed: {}", e);
        }
        result
    }

    /// Refresh the stored pair in place. Any failure is an `Auth` error.
    async fn refresh_stored(&self) -> EngineResult<()> {
        let refresh_token = self
            .tokens
            .refresh_token()
            .ok_or_else(|| EngineError::Auth("No refresh token stored".into()))?;
        let pair = self
            .refresh(&refresh_token)
            .await
            .map_err(|e| EngineError::Auth(format!("Token refresh failed: {}", e)))?;
        self.tokens.replace(pair);
        Ok(())
    }

    /// Send an authenticated request, with one refresh-and-retry on an
    /// expired access token.
    async fn send_authed<F>(&self, build: F) -> EngineResult<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let mut refreshed = false;
        loop {
            let access_token = self
                .tokens
                .access_token()
                .ok_or_else(|| EngineError::Auth("Not signed in".into()))?;
            let resp = build(&self.rest).bearer_auth(&access_token).send().await?;
            match check(resp).await {
                Err(e) if !refreshed && is_token_expired(&e) => {
                    info!("[auth] Access token expired, refreshing");
                    self.refresh_stored().await?;
                    refreshed = true;
                }
                other => return other,
            }
        }
    }
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn refresh(&self, refresh_token: &str) -> EngineResult<TokenPair> {
        let url = self.endpoint(AUTH_REFRESH_PATH)?;
        let body = RefreshRequest {
            refresh_token: refresh_token.to_string(),
        };
        let resp = self.rest.post(url).json(&body).send().await?;
        let pair = read_json(resp).await?;
        debug!("[auth] Token pair refreshed");
        Ok(pair)
    }

    async fn open_question(
        &self,
        access_token: &str,
        request: &QuestionRequest,
    ) -> EngineResult<QuestionStream> {
        let url = self.endpoint(QUESTION_PATH)?;
        let resp = self
            .stream
            .post(url)
            .bearer_auth(access_token)
            .header("Accept", "text/event-stream")
            .json(request)
            .send()
            .await?;
        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!("[http] Question stream rejected: {}", parse_api_error(status, &body));
            return Ok(QuestionStream {
                status,
                frames: futures::stream::empty().boxed(),
            });
        }
        debug!("[http] Question stream open ({})", status);
        Ok(QuestionStream {
            status,
            frames: sse::frames(resp.bytes_stream()),
        })
    }

    async fn retrieve_law_references(
        &self,
        request: &RetrievalRequest,
    ) -> EngineResult<RetrievalResponse> {
        let url = self.endpoint(RETRIEVAL_PATH)?;
        let resp = self
            .send_authed(|client| client.post(url.clone()).json(request))
            .await?;
        read_json(resp).await
    }

    async fn rename_room(&self, room_id: &str, name: &str) -> EngineResult<ChatRoom> {
        let url = self.item(CHAT_ROOMS_PATH, room_id)?;
        let body = RenameRoomRequest {
            name: name.to_string(),
        };
        let resp = self
            .send_authed(|client| client.put(url.clone()).json(&body))
            .await?;
        read_json(resp).await
    }

    async fn rate_chat(&self, chat_id: &str, request: &RateChatRequest) -> EngineResult<()> {
        let url = self.item(CHATS_PATH, chat_id)?;
        self.send_authed(|client| client.put(url.clone()).json(request))
            .await?;
        Ok(())
    }

    async fn list_chats(&self, room_id: &str) -> EngineResult<Vec<StoredChat>> {
        let mut url = self.endpoint(CHATS_PATH)?;
        url.query_pairs_mut().append_pair("chat_room_id", room_id);
        let resp = self.send_authed(|client| client.get(url.clone())).await?;
        read_json(resp).await
    }
}

/// Pass a success response through; turn anything else into `Api`.
async fn check(resp: Response) -> EngineResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(parse_api_error(status.as_u16(), &body))
}

async fn read_json<T: DeserializeOwned>(resp: Response) -> EngineResult<T> {
    let resp = check(resp).await?;
    let bytes = resp.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}
