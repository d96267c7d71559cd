use std::collections::HashMap;

use super::credits::add_credit_in;
use super::files::insert_file;
use super::models::{AlbumId, AlbumLink, ImportFile, ImportOutcome, NewTrack, TrackInfo};
use super::registry::{create_album_in, get_or_create_album_in, get_or_create_artist_in};
use super::tracks::split_in;
use super::{Database, Result};

impl Database {
    /// Ingest a file, decompose it into tracks and attach credits, all in one
    /// transaction. Any failure leaves the catalog untouched.
    ///
    /// Identical album links within one import resolve to one album, so
    /// tracks of an untitled, undated album image still share it.
    pub fn import(&self, unit: &ImportFile) -> Result<ImportOutcome> {
        let tx = self.write_tx()?;
        let file = insert_file(&tx, &unit.file)?;

        let mut albums: HashMap<&AlbumLink, AlbumId> = HashMap::new();
        let mut new_tracks = Vec::with_capacity(unit.tracks.len());
        for t in &unit.tracks {
            let album = match &t.album {
                Some(link) => Some(match albums.get(link) {
                    Some(id) => *id,
                    None => {
                        let id = match link {
                            AlbumLink::Lookup(r) => {
                                get_or_create_album_in(&tx, r.title.as_deref(), r.year)?
                            }
                            AlbumLink::Create(r) => {
                                create_album_in(&tx, r.title.as_deref(), r.year)?
                            }
                            AlbumLink::Existing(id) => *id,
                        };
                        albums.insert(link, id);
                        id
                    }
                }),
                None => None,
            };
            new_tracks.push(NewTrack {
                span: t.span,
                info: TrackInfo {
                    title: t.title.clone(),
                    album,
                    disc_number: t.disc_number,
                    track_number: t.track_number,
                    genre: t.genre.clone(),
                    rating: t.rating,
                },
            });
        }

        let split = split_in(&tx, file, &new_tracks)?;
        for (track_id, t) in split.tracks.iter().zip(&unit.tracks) {
            for (i, credit) in t.credits.iter().enumerate() {
                let artist = get_or_create_artist_in(&tx, &credit.artist)?;
                add_credit_in(&tx, *track_id, artist, i as f64, &credit.role)?;
            }
        }

        tx.commit()?;
        log::info!(
            "Imported {} with {} track(s)",
            unit.file.path,
            split.tracks.len()
        );
        Ok(ImportOutcome {
            file,
            tracks: split.tracks,
            overlaps: split.overlaps,
        })
    }
}
