use anyhow::{Context, Result, bail};
use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use taskbot_core::{LanguageModel, TaskbotError};

use crate::config::{LlmSection, normalize_model};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

/// OpenAI-compatible chat-completions client (OpenAI, vsegpt, OpenRouter...).
#[derive(Debug, Clone)]
pub struct ChatCompletions {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    temperature: f32,
}

#[derive(Serialize)]
struct Msg<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct Req<'a> {
    model: &'a str,
    messages: Vec<Msg<'a>>,
    temperature: f32,
}

#[derive(Deserialize)]
struct Resp {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: MsgOut,
}

#[derive(Deserialize)]
struct MsgOut {
    content: Option<String>,
}

impl ChatCompletions {
    pub fn new(cfg: &LlmSection, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            url: completions_url(&cfg.base_url),
            api_key,
            model: normalize_model(&cfg.model),
            temperature: cfg.temperature,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn request(&self, prompt: &str) -> Result<String> {
        let body = Req {
            model: &self.model,
            messages: vec![Msg {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
        };

        let resp = self
            .client
            .post(&self.url)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .context("llm request")?;

        let status = resp.status();
        if !status.is_success() {
            let txt = resp.text().await.unwrap_or_default();
            bail!("llm error: {status} {txt}");
        }

        let out: Resp = resp.json().await.context("parse llm response")?;
        let content = out
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        Ok(content.trim().to_string())
    }
}

impl LanguageModel for ChatCompletions {
    fn complete(
        &self,
        prompt: &str,
    ) -> impl Future<Output = taskbot_core::Result<String>> + Send {
        async move {
            self.request(prompt)
                .await
                .map_err(|e| TaskbotError::call(format!("{e:#}")))
        }
    }
}

fn completions_url(base_url: &str) -> String {
    let base = base_url.trim().trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else {
        format!("{base}/chat/completions")
    }
}
