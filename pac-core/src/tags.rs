//! Tag translation between container flavours.
//!
//! [`TagTable`] is the internal value type: a fixed set of semantic fields
//! plus an opaque passthrough for source extras. Reading from FLAC Vorbis
//! comments and writing to MP4 ilst atoms or Opus Vorbis comments are total
//! functions over the fixed set; fields absent in the source stay absent in
//! the target.

use std::borrow::Cow;
use std::fs::File;
use std::path::Path;

use lofty::config::ParseOptions;
use lofty::file::AudioFile;
use lofty::flac::FlacFile;
use lofty::mp4::{Atom, AtomData, AtomIdent, Ilst};
use lofty::ogg::VorbisComments;
use lofty::tag::Accessor;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TagError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("source parse failed: {0}")]
    Parse(String),
}

/// Vorbis keys consumed into fixed fields; everything else rides along in
/// `extras` (Vorbis-flavoured targets only).
const CONSUMED_KEYS: &[&str] = &[
    "TITLE",
    "ARTIST",
    "ALBUM",
    "ALBUMARTIST",
    "ALBUM ARTIST",
    "TRACKNUMBER",
    "TRACKTOTAL",
    "TOTALTRACKS",
    "DISCNUMBER",
    "DISCTOTAL",
    "TOTALDISCS",
    "DATE",
    "YEAR",
    "GENRE",
    "COMPILATION",
    "COMMENT",
    "DESCRIPTION",
];

/// MusicBrainz identifiers: Vorbis key and the matching iTunes-style MP4
/// freeform atom name.
const MUSICBRAINZ_KEYS: &[(&str, &str)] = &[
    ("MUSICBRAINZ_TRACKID", "MusicBrainz Track Id"),
    ("MUSICBRAINZ_RELEASETRACKID", "MusicBrainz Release Track Id"),
    ("MUSICBRAINZ_ALBUMID", "MusicBrainz Album Id"),
    ("MUSICBRAINZ_ARTISTID", "MusicBrainz Artist Id"),
    ("MUSICBRAINZ_ALBUMARTISTID", "MusicBrainz Album Artist Id"),
    ("MUSICBRAINZ_RELEASEGROUPID", "MusicBrainz Release Group Id"),
];

const MP4_ITUNES_MEAN: &str = "com.apple.iTunes";

/// The fixed semantic tag set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagTable {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub album_artist: Option<String>,
    pub track: Option<u32>,
    pub track_total: Option<u32>,
    pub disc: Option<u32>,
    pub disc_total: Option<u32>,
    pub year: Option<u32>,
    pub genre: Option<String>,
    pub compilation: Option<bool>,
    pub comment: Option<String>,
    /// `(vorbis_key, mp4_freeform_name, value)` for identifiers present in
    /// the source.
    pub musicbrainz: Vec<(String, String, String)>,
    /// Unconsumed source comments, carried verbatim into Vorbis-flavoured
    /// targets.
    pub extras: Vec<(String, String)>,
}

impl TagTable {
    /// Read the tag table from a FLAC file's Vorbis comments.
    pub fn read_from_flac(path: &Path) -> Result<Self, TagError> {
        let mut file = File::open(path)?;
        let flac = FlacFile::read_from(&mut file, ParseOptions::new())
            .map_err(|e| TagError::Parse(e.to_string()))?;
        Ok(match flac.vorbis_comments() {
            Some(comments) => Self::from_vorbis(comments),
            None => Self::default(),
        })
    }

    /// Build the table from a Vorbis comment block (keys are
    /// case-insensitive per the Vorbis spec).
    pub fn from_vorbis(comments: &VorbisComments) -> Self {
        let all = |key: &str| -> Vec<String> {
            comments
                .items()
                .filter(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v.to_string())
                .collect()
        };
        let joined = |key: &str| -> Option<String> {
            let values = all(key);
            (!values.is_empty()).then(|| values.join("; "))
        };
        let first = |key: &str| all(key).into_iter().next();

        // TRACKNUMBER may carry a "3/12" pair.
        let (track, mut track_total) = split_number_pair(first("TRACKNUMBER").as_deref());
        if track_total.is_none() {
            track_total = parse_u32(first("TRACKTOTAL").or_else(|| first("TOTALTRACKS")).as_deref());
        }
        let (disc, mut disc_total) = split_number_pair(first("DISCNUMBER").as_deref());
        if disc_total.is_none() {
            disc_total = parse_u32(first("DISCTOTAL").or_else(|| first("TOTALDISCS")).as_deref());
        }

        let year = first("DATE")
            .or_else(|| first("YEAR"))
            .as_deref()
            .and_then(leading_year);

        let compilation = first("COMPILATION").map(|v| {
            let v = v.trim();
            v == "1" || v.eq_ignore_ascii_case("true")
        });

        let musicbrainz = MUSICBRAINZ_KEYS
            .iter()
            .filter_map(|(vorbis, mp4)| {
                first(vorbis).map(|v| ((*vorbis).to_string(), (*mp4).to_string(), v))
            })
            .collect();

        let consumed = |key: &str| {
            CONSUMED_KEYS.iter().any(|c| c.eq_ignore_ascii_case(key))
                || MUSICBRAINZ_KEYS.iter().any(|(v, _)| v.eq_ignore_ascii_case(key))
        };
        let extras = comments
            .items()
            .filter(|(k, _)| !consumed(k) && !k.to_ascii_uppercase().starts_with("PAC_"))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        TagTable {
            title: joined("TITLE"),
            artist: joined("ARTIST"),
            album: first("ALBUM"),
            album_artist: joined("ALBUMARTIST").or_else(|| joined("ALBUM ARTIST")),
            track,
            track_total,
            disc,
            disc_total,
            year,
            genre: joined("GENRE"),
            compilation,
            comment: first("COMMENT").or_else(|| first("DESCRIPTION")),
            musicbrainz,
            extras,
        }
    }

    /// Translate into MP4 ilst atoms. Extras are not representable in MP4
    /// and are dropped; the fixed set and MusicBrainz identifiers carry.
    pub fn apply_to_ilst(&self, ilst: &mut Ilst) {
        if let Some(v) = &self.title {
            ilst.set_title(v.clone());
        }
        if let Some(v) = &self.artist {
            ilst.set_artist(v.clone());
        }
        if let Some(v) = &self.album {
            ilst.set_album(v.clone());
        }
        if let Some(v) = &self.album_artist {
            ilst.insert(Atom::new(
                AtomIdent::Fourcc(*b"aART"),
                AtomData::UTF8(v.clone()),
            ));
        }
        if let Some(v) = self.track {
            ilst.set_track(v);
        }
        if let Some(v) = self.track_total {
            ilst.set_track_total(v);
        }
        if let Some(v) = self.disc {
            ilst.set_disk(v);
        }
        if let Some(v) = self.disc_total {
            ilst.set_disk_total(v);
        }
        if let Some(v) = self.year {
            ilst.set_year(v);
        }
        if let Some(v) = &self.genre {
            ilst.set_genre(v.clone());
        }
        if let Some(true) = self.compilation {
            ilst.insert(Atom::new(AtomIdent::Fourcc(*b"cpil"), AtomData::Bool(true)));
        }
        if let Some(v) = &self.comment {
            ilst.set_comment(v.clone());
        }
        for (_, mp4_name, value) in &self.musicbrainz {
            ilst.insert(Atom::new(
                AtomIdent::Freeform {
                    mean: Cow::Borrowed(MP4_ITUNES_MEAN),
                    name: Cow::Owned(mp4_name.clone()),
                },
                AtomData::UTF8(value.clone()),
            ));
        }
    }

    /// Translate into Vorbis comments, extras included verbatim.
    pub fn apply_to_vorbis(&self, comments: &mut VorbisComments) {
        let mut set = |key: &str, value: Option<&str>| {
            comments.remove(key).for_each(drop);
            if let Some(v) = value {
                comments.push(key.to_string(), v.to_string());
            }
        };
        set("TITLE", self.title.as_deref());
        set("ARTIST", self.artist.as_deref());
        set("ALBUM", self.album.as_deref());
        set("ALBUMARTIST", self.album_artist.as_deref());
        set("TRACKNUMBER", self.track.map(|n| n.to_string()).as_deref());
        set(
            "TRACKTOTAL",
            self.track_total.map(|n| n.to_string()).as_deref(),
        );
        set("DISCNUMBER", self.disc.map(|n| n.to_string()).as_deref());
        set(
            "DISCTOTAL",
            self.disc_total.map(|n| n.to_string()).as_deref(),
        );
        set("DATE", self.year.map(|y| y.to_string()).as_deref());
        set("GENRE", self.genre.as_deref());
        set(
            "COMPILATION",
            self.compilation.map(|c| if c { "1" } else { "0" }).as_deref(),
        );
        set("COMMENT", self.comment.as_deref());
        for (vorbis_key, _, value) in &self.musicbrainz {
            set(vorbis_key, Some(value));
        }
        for (key, value) in &self.extras {
            comments.push(key.clone(), value.clone());
        }
    }
}

fn parse_u32(value: Option<&str>) -> Option<u32> {
    value.and_then(|v| v.trim().parse().ok())
}

/// Split forms like `3/12` into `(3, Some(12))`; plain numbers yield
/// `(n, None)`.
fn split_number_pair(value: Option<&str>) -> (Option<u32>, Option<u32>) {
    let Some(v) = value else {
        return (None, None);
    };
    match v.split_once('/') {
        Some((a, b)) => (parse_u32(Some(a)), parse_u32(Some(b))),
        None => (parse_u32(Some(v)), None),
    }
}

/// Year from a leading four-digit run, e.g. `1994-05-02` → `1994`.
fn leading_year(date: &str) -> Option<u32> {
    let digits: String = date.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.len() >= 4 {
        digits[..4].parse().ok()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comments(pairs: &[(&str, &str)]) -> VorbisComments {
        let mut c = VorbisComments::default();
        for (k, v) in pairs {
            c.push((*k).to_string(), (*v).to_string());
        }
        c
    }

    #[test]
    fn reads_fixed_fields_case_insensitively() {
        let c = comments(&[
            ("title", "Song"),
            ("Artist", "Band"),
            ("ALBUM", "Record"),
            ("tracknumber", "3"),
            ("TRACKTOTAL", "12"),
            ("date", "1994-05-02"),
        ]);
        let t = TagTable::from_vorbis(&c);
        assert_eq!(t.title.as_deref(), Some("Song"));
        assert_eq!(t.artist.as_deref(), Some("Band"));
        assert_eq!(t.track, Some(3));
        assert_eq!(t.track_total, Some(12));
        assert_eq!(t.year, Some(1994));
    }

    #[test]
    fn track_pair_form_is_split() {
        let c = comments(&[("TRACKNUMBER", "3/12")]);
        let t = TagTable::from_vorbis(&c);
        assert_eq!(t.track, Some(3));
        assert_eq!(t.track_total, Some(12));
    }

    #[test]
    fn multiple_artists_join() {
        let c = comments(&[("ARTIST", "A"), ("ARTIST", "B")]);
        let t = TagTable::from_vorbis(&c);
        assert_eq!(t.artist.as_deref(), Some("A; B"));
    }

    #[test]
    fn compilation_flag_parses() {
        assert_eq!(
            TagTable::from_vorbis(&comments(&[("COMPILATION", "1")])).compilation,
            Some(true)
        );
        assert_eq!(
            TagTable::from_vorbis(&comments(&[("COMPILATION", "0")])).compilation,
            Some(false)
        );
    }

    #[test]
    fn extras_exclude_consumed_and_pac_keys() {
        let c = comments(&[
            ("TITLE", "Song"),
            ("CUSTOM", "kept"),
            ("PAC_SRC_MD5", "dropped"),
            ("MUSICBRAINZ_TRACKID", "mbid"),
        ]);
        let t = TagTable::from_vorbis(&c);
        assert_eq!(t.extras, vec![("CUSTOM".to_string(), "kept".to_string())]);
        assert_eq!(t.musicbrainz.len(), 1);
    }

    #[test]
    fn vorbis_round_trip_preserves_fixed_set() {
        let c = comments(&[
            ("TITLE", "Song"),
            ("ARTIST", "Band"),
            ("TRACKNUMBER", "3/12"),
            ("DATE", "2001"),
            ("CUSTOM", "kept"),
        ]);
        let t = TagTable::from_vorbis(&c);
        let mut out = VorbisComments::default();
        t.apply_to_vorbis(&mut out);
        let back = TagTable::from_vorbis(&out);
        assert_eq!(back.title, t.title);
        assert_eq!(back.track, Some(3));
        assert_eq!(back.track_total, Some(12));
        assert_eq!(back.year, Some(2001));
        assert_eq!(back.extras, t.extras);
    }

    #[test]
    fn absent_fields_stay_absent() {
        let t = TagTable::from_vorbis(&comments(&[("TITLE", "Song")]));
        let mut out = VorbisComments::default();
        t.apply_to_vorbis(&mut out);
        assert!(out.get("ARTIST").is_none());
        assert!(out.get("GENRE").is_none());
    }

    #[test]
    fn year_needs_four_leading_digits() {
        assert_eq!(leading_year("1994"), Some(1994));
        assert_eq!(leading_year("94"), None);
        assert_eq!(leading_year("approx 1994"), None);
    }
}
