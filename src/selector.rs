use crate::dataset::SubtitleFile;

/// Without a requested episode a complete pack wins. With one, an
/// episode-specific pack beats an individual file for that episode, and
/// anything else falls back to the first candidate.
pub fn select_best_file<'a, I>(
    candidates: I,
    requested_episode: Option<u32>,
) -> Option<&'a SubtitleFile>
where
    I: IntoIterator<Item = &'a SubtitleFile>,
    I::IntoIter: Clone,
{
    let candidates = candidates.into_iter();
    let fallback = candidates.clone().next()?;

    let Some(episode) = requested_episode else {
        return Some(
            candidates
                .clone()
                .find(|file| file.is_complete_pack())
                .unwrap_or(fallback),
        );
    };

    let selected = candidates
        .clone()
        .find(|file| file.is_episode_pack(episode))
        .or_else(|| candidates.clone().find(|file| file.is_individual_for(episode)))
        .unwrap_or(fallback);

    Some(selected)
}
