//! Messaging transport abstraction.
//!
//! The funnel only speaks to the [`Messenger`] trait; [`TelegramMessenger`]
//! is the production implementation over `teloxide::Bot`.

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{FileId, InputFile, Recipient};
use teloxide::RequestError;

use crate::errors::TransportError;

/// A single inline button
#[derive(Clone, Debug, PartialEq)]
pub enum Button {
    /// Sends `data` back as a callback query
    Callback { label: String, data: String },
    /// Opens a link
    Url { label: String, url: String },
}

impl Button {
    pub fn callback(label: impl Into<String>, data: impl Into<String>) -> Self {
        Button::Callback {
            label: label.into(),
            data: data.into(),
        }
    }

    pub fn url(label: impl Into<String>, url: impl Into<String>) -> Self {
        Button::Url {
            label: label.into(),
            url: url.into(),
        }
    }
}

/// Inline keyboard as rows of buttons
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Keyboard {
    pub rows: Vec<Vec<Button>>,
}

impl Keyboard {
    pub fn single(button: Button) -> Self {
        Self {
            rows: vec![vec![button]],
        }
    }

    pub fn row(mut self, buttons: Vec<Button>) -> Self {
        self.rows.push(buttons);
        self
    }

    /// Every callback payload on the keyboard
    pub fn callback_data(&self) -> Vec<&str> {
        self.rows
            .iter()
            .flatten()
            .filter_map(|button| match button {
                Button::Callback { data, .. } => Some(data.as_str()),
                Button::Url { .. } => None,
            })
            .collect()
    }
}

/// Channel membership as reported by the transport
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemberStatus {
    Member,
    NotMember,
}

/// Outbound operations the bot needs from the messaging platform
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<(), TransportError>;

    /// Send a document by its pre-uploaded reference
    async fn send_document_ref(
        &self,
        chat_id: i64,
        file_ref: &str,
        caption: &str,
    ) -> Result<(), TransportError>;

    /// Upload and send a document
    async fn send_document_bytes(
        &self,
        chat_id: i64,
        file_name: &str,
        bytes: Vec<u8>,
        caption: &str,
    ) -> Result<(), TransportError>;

    async fn member_status(
        &self,
        channel: &str,
        user_id: i64,
    ) -> Result<MemberStatus, TransportError>;

    async fn member_count(&self, channel: &str) -> Result<u64, TransportError>;

    /// The bot's own handle; doubles as a reachability check
    async fn whoami(&self) -> Result<String, TransportError>;
}

impl From<RequestError> for TransportError {
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::Network(e) => TransportError::Network(e.to_string()),
            RequestError::Io(e) => TransportError::Network(e.to_string()),
            other => TransportError::Api(other.to_string()),
        }
    }
}

/// Channel id as a teloxide recipient: `@name` or a numeric chat id
pub fn channel_recipient(channel: &str) -> Result<Recipient, TransportError> {
    let channel = channel.trim();
    if channel.starts_with('@') {
        return Ok(Recipient::ChannelUsername(channel.to_string()));
    }
    channel
        .parse::<i64>()
        .map(|id| Recipient::Id(ChatId(id)))
        .map_err(|_| TransportError::InvalidRequest(format!("bad channel id: {channel}")))
}

fn user_id(id: i64) -> Result<UserId, TransportError> {
    u64::try_from(id)
        .map(UserId)
        .map_err(|_| TransportError::InvalidRequest(format!("bad user id: {id}")))
}

/// [`Messenger`] over the Telegram Bot API
#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<(), TransportError> {
        let request = self.bot.send_message(ChatId(chat_id), text);
        match keyboard {
            Some(keyboard) => {
                request
                    .reply_markup(crate::bot::ui_builder::to_markup(&keyboard))
                    .await?
            }
            None => request.await?,
        };
        Ok(())
    }

    async fn send_document_ref(
        &self,
        chat_id: i64,
        file_ref: &str,
        caption: &str,
    ) -> Result<(), TransportError> {
        self.bot
            .send_document(ChatId(chat_id), InputFile::file_id(FileId(file_ref.to_string())))
            .caption(caption)
            .await?;
        Ok(())
    }

    async fn send_document_bytes(
        &self,
        chat_id: i64,
        file_name: &str,
        bytes: Vec<u8>,
        caption: &str,
    ) -> Result<(), TransportError> {
        self.bot
            .send_document(
                ChatId(chat_id),
                InputFile::memory(bytes).file_name(file_name.to_string()),
            )
            .caption(caption)
            .await?;
        Ok(())
    }

    async fn member_status(
        &self,
        channel: &str,
        user: i64,
    ) -> Result<MemberStatus, TransportError> {
        let member = self
            .bot
            .get_chat_member(channel_recipient(channel)?, user_id(user)?)
            .await?;
        Ok(if member.is_present() {
            MemberStatus::Member
        } else {
            MemberStatus::NotMember
        })
    }

    async fn member_count(&self, channel: &str) -> Result<u64, TransportError> {
        let count = self
            .bot
            .get_chat_member_count(channel_recipient(channel)?)
            .await?;
        Ok(u64::from(count))
    }

    async fn whoami(&self) -> Result<String, TransportError> {
        let me = self.bot.get_me().await?;
        Ok(me.user.username.clone().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_recipient() {
        assert_eq!(
            channel_recipient("@wine_channel").unwrap(),
            Recipient::ChannelUsername("@wine_channel".to_string())
        );
        assert_eq!(
            channel_recipient("-1001234567890").unwrap(),
            Recipient::Id(ChatId(-1001234567890))
        );
        assert!(channel_recipient("wine_channel").is_err());
    }

    #[test]
    fn test_user_id_rejects_negative_ids() {
        assert_eq!(user_id(42).unwrap(), UserId(42));
        assert!(user_id(-5).is_err());
    }

    #[test]
    fn test_keyboard_callback_data() {
        let keyboard = Keyboard::single(Button::url("Channel", "https://t.me/wine"))
            .row(vec![Button::callback("Check", "check_sub")]);
        assert_eq!(keyboard.callback_data(), vec!["check_sub"]);
    }
}
