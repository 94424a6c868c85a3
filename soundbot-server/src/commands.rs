// File: soundbot-server/src/commands.rs
//
// Prefix text commands: join, play <sound>, stop, leave, sounds.

use std::sync::Arc;

use tracing::{debug, error, warn};
use twilight_model::gateway::payload::incoming::MessageCreate;

use soundbot_common::error::Error;
use soundbot_common::models::voice::{GuildId, UserId, VoiceMember};
use soundbot_common::traits::voice_traits::Sample;

use crate::context::BotContext;

/// Discord rejects message bodies above this many characters.
const MAX_MESSAGE_LEN: usize = 2000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    Join,
    Play(String),
    Stop,
    Leave,
    Sounds,
}

pub fn parse(prefix: &str, content: &str) -> Option<BotCommand> {
    let rest = content.trim().strip_prefix(prefix)?;
    let mut parts = rest.splitn(2, char::is_whitespace);
    let name = parts.next()?.to_lowercase();
    let arg = parts.next().map(str::trim).unwrap_or_default();

    match name.as_str() {
        "join" => Some(BotCommand::Join),
        "play" | "p" if !arg.is_empty() => Some(BotCommand::Play(arg.to_string())),
        "stop" => Some(BotCommand::Stop),
        "leave" | "disconnect" => Some(BotCommand::Leave),
        "sounds" | "list" => Some(BotCommand::Sounds),
        _ => None,
    }
}

pub async fn handle_message(ctx: Arc<BotContext>, msg: Box<MessageCreate>) {
    let Some(guild_id) = msg.guild_id else {
        return;
    };
    let Some(command) = parse(&ctx.command_prefix, &msg.content) else {
        return;
    };
    debug!("(Commands) guild {guild_id} => {} ran {command:?}", msg.author.name);

    let reply = match run(&ctx, guild_id, msg.author.id, command).await {
        Ok(Some(text)) => text,
        Ok(None) => return,
        Err(Error::NotFound(what)) => what,
        Err(e) if e.is_user_facing() => e.to_string(),
        Err(e) => {
            error!("(Commands) guild {guild_id} => command failed: {e}");
            "Something went wrong, check the logs.".to_string()
        }
    };

    if let Err(e) = ctx.http.create_message(msg.channel_id).content(&reply).await {
        warn!("(Commands) could not reply in {}: {e:?}", msg.channel_id);
    }
}

async fn run(
    ctx: &BotContext,
    guild_id: GuildId,
    user_id: UserId,
    command: BotCommand,
) -> Result<Option<String>, Error> {
    match command {
        BotCommand::Join => {
            let session = ctx.registry.join(&voice_member(ctx, guild_id, user_id)).await?;
            Ok(Some(format!("Joined <#{}>.", session.channel_id())))
        }
        BotCommand::Play(name) => {
            let sample = ctx.library.find(&name).await?;
            let session = ctx.registry.join(&voice_member(ctx, guild_id, user_id)).await?;
            session.play(&sample).await?;
            Ok(None)
        }
        BotCommand::Stop => match ctx.registry.get(guild_id) {
            Some(session) => {
                session.stop().await;
                Ok(None)
            }
            None => Ok(Some("Nothing is playing.".to_string())),
        },
        BotCommand::Leave => match ctx.registry.get(guild_id) {
            Some(session) => {
                session.destroy().await;
                Ok(Some("Bye!".to_string()))
            }
            None => Ok(Some("I'm not in a voice channel.".to_string())),
        },
        BotCommand::Sounds => {
            let names: Vec<String> = ctx
                .library
                .list()
                .await?
                .iter()
                .map(|s| format!("`{}`", s.id()))
                .collect();
            if names.is_empty() {
                return Ok(Some("No sounds yet.".to_string()));
            }
            Ok(Some(sound_list(&names)))
        }
    }
}

fn voice_member(ctx: &BotContext, guild_id: GuildId, user_id: UserId) -> VoiceMember {
    VoiceMember {
        guild_id,
        user_id,
        channel_id: ctx
            .cache
            .voice_state(user_id, guild_id)
            .map(|state| state.channel_id()),
    }
}

fn sound_list(names: &[String]) -> String {
    let mut out = String::from("Sounds: ");
    for (i, name) in names.iter().enumerate() {
        let sep = if i == 0 { "" } else { ", " };
        if out.len() + sep.len() + name.len() + 4 > MAX_MESSAGE_LEN {
            out.push_str(", …");
            break;
        }
        out.push_str(sep);
        out.push_str(name);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse("!", "!join"), Some(BotCommand::Join));
        assert_eq!(parse("!", "  !PLAY  Airhorn "), Some(BotCommand::Play("Airhorn".into())));
        assert_eq!(parse("!", "!p bruh"), Some(BotCommand::Play("bruh".into())));
        assert_eq!(parse("!", "!stop"), Some(BotCommand::Stop));
        assert_eq!(parse("!", "!leave"), Some(BotCommand::Leave));
        assert_eq!(parse("!", "!sounds"), Some(BotCommand::Sounds));
    }

    #[test]
    fn test_parse_rejects_other_messages() {
        assert_eq!(parse("!", "join"), None);
        assert_eq!(parse("!", "!play"), None);
        assert_eq!(parse("!", "!dance"), None);
        assert_eq!(parse("sb ", "!join"), None);
        assert_eq!(parse("sb ", "sb join"), Some(BotCommand::Join));
    }

    #[test]
    fn test_sound_list_stays_under_limit() {
        let names: Vec<String> = (0..1000).map(|i| format!("`sound{i}`")).collect();
        let out = sound_list(&names);
        assert!(out.chars().count() <= MAX_MESSAGE_LEN);
        assert!(out.ends_with('…'));

        assert_eq!(sound_list(&["`a`".into(), "`b`".into()]), "Sounds: `a`, `b`");
    }
}
