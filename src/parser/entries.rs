use super::blocks::Block;
use crate::error::PipelineError;
use crate::release::RawEntry;

/// Fold the block sequence into raw entries. Each entry takes the date of
/// the nearest preceding heading and the first paragraph that follows it.
pub fn walk(product: &str, blocks: &[Block]) -> Result<Vec<RawEntry>, PipelineError> {
    let (_, entries) = blocks.iter().enumerate().try_fold(
        (None::<&str>, Vec::new()),
        |(current_date, mut entries), (idx, block)| match block {
            Block::Heading(text) => Ok((Some(text.as_str()), entries)),
            Block::Paragraph(_) => Ok((current_date, entries)),
            Block::Entry { marker } => {
                let Some(date_text) = current_date else {
                    return Err(PipelineError::malformed(
                        product,
                        format!("entry block #{} appears before any date heading", idx),
                    ));
                };
                let Some(marker) = marker else {
                    return Err(PipelineError::malformed(
                        product,
                        format!("entry block #{} under '{}' has no category marker", idx, date_text),
                    ));
                };
                let Some(description) = next_paragraph(&blocks[idx + 1..]) else {
                    return Err(PipelineError::malformed(
                        product,
                        format!("entry block #{} under '{}' has no description", idx, date_text),
                    ));
                };
                entries.push(RawEntry {
                    date_text: date_text.to_string(),
                    marker: marker.clone(),
                    description: description.to_string(),
                });
                Ok((current_date, entries))
            }
        },
    )?;
    Ok(entries)
}

fn next_paragraph(rest: &[Block]) -> Option<&str> {
    rest.iter().find_map(|b| match b {
        Block::Paragraph(t) => Some(t.as_str()),
        _ => None,
    })
}
