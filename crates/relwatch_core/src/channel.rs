use regex::Regex;
use tracing::warn;

use crate::model::{Channel, ChannelName, ChannelType, Release};

/// Version-string markers that taint a release for the no-channel
/// fallback rule.
const PRERELEASE_KEYWORDS: [&str; 6] = ["alpha", "beta", "rc", "pre", "dev", "snapshot"];

/// Whether a draft belongs to a channel: platform-type predicate, then
/// include pattern, then exclude pattern (exclude wins).
///
/// A malformed pattern must not break a tracker permanently, so it is
/// logged and treated as absent.
pub fn matches_channel(release: &Release, channel: &Channel) -> bool {
    match channel.channel_type {
        Some(ChannelType::Release) if release.prerelease => return false,
        Some(ChannelType::Prerelease) if !release.prerelease => return false,
        _ => {}
    }

    if let Some(pattern) = &channel.include_pattern {
        match Regex::new(pattern) {
            Ok(re) => {
                if !re.is_match(&release.tag_name) {
                    return false;
                }
            }
            Err(e) => warn!(
                channel = channel.name.as_str(),
                "invalid include_pattern {pattern:?} ignored: {e}"
            ),
        }
    }

    if let Some(pattern) = &channel.exclude_pattern {
        match Regex::new(pattern) {
            Ok(re) => {
                if re.is_match(&release.tag_name) {
                    return false;
                }
            }
            Err(e) => warn!(
                channel = channel.name.as_str(),
                "invalid exclude_pattern {pattern:?} ignored: {e}"
            ),
        }
    }

    true
}

/// Picks what a check should persist from a newest-first draft window.
///
/// Each enabled channel contributes its newest matching draft, tagged with
/// the channel name. Survivors are deduplicated by version; when one draft
/// satisfies several channels the last channel in list order keeps the
/// tag. Without channels, a single draft is chosen by the legacy rule and
/// given a synthetic stable/prerelease channel.
pub fn select_for_save(channels: &[Channel], drafts: &[Release]) -> Vec<Release> {
    if channels.is_empty() {
        return legacy_select(drafts).into_iter().collect();
    }

    let mut selected: Vec<Release> = Vec::new();
    for channel in channels.iter().filter(|c| c.enabled) {
        let Some(hit) = drafts.iter().find(|d| matches_channel(d, channel)) else {
            continue;
        };
        match selected.iter_mut().find(|r| r.version == hit.version) {
            Some(existing) => existing.channel_name = Some(channel.name),
            None => {
                let mut draft = hit.clone();
                draft.channel_name = Some(channel.name);
                selected.push(draft);
            }
        }
    }
    selected
}

fn legacy_select(drafts: &[Release]) -> Option<Release> {
    let hit = drafts.iter().find(|d| legacy_should_include(d))?;
    let mut draft = hit.clone();
    draft.channel_name = Some(if draft.prerelease {
        ChannelName::Prerelease
    } else {
        ChannelName::Stable
    });
    Some(draft)
}

fn legacy_should_include(release: &Release) -> bool {
    if release.prerelease {
        return false;
    }
    let version = release.version.to_lowercase();
    !PRERELEASE_KEYWORDS.iter().any(|k| version.contains(k))
}

/// Headline version across a tracker's channels: newest published_at among
/// each enabled channel's first match. Used for status rows and the
/// tracker list.
pub fn select_best_release(releases: &[Release], channels: &[Channel]) -> Option<Release> {
    if releases.is_empty() {
        return None;
    }
    let enabled: Vec<&Channel> = channels.iter().filter(|c| c.enabled).collect();
    if enabled.is_empty() {
        return releases.first().cloned();
    }
    enabled
        .iter()
        .filter_map(|channel| releases.iter().find(|r| matches_channel(r, channel)))
        .max_by_key(|r| r.published_at)
        .cloned()
}
