use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use url::Url;

use crate::dataset::SubtitleFile;

// Matches JavaScript's encodeURIComponent, which pack archive names are stored under.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

const TORRENT_PACK_KIND: &str = "torattachpk";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackArchive {
    Torrent,
    Episode,
}

impl PackArchive {
    fn for_file(file: &SubtitleFile) -> Self {
        match file.pack_url_type.as_deref() {
            Some(TORRENT_PACK_KIND) => PackArchive::Torrent,
            _ => PackArchive::Episode,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LinkBuilder {
    storage_base: Url,
    torrent_pack_base: Url,
}

impl LinkBuilder {
    pub fn new(storage_base: Url, torrent_pack_base: Url) -> Self {
        Self {
            storage_base,
            torrent_pack_base,
        }
    }

    pub fn attachment(&self, afid: u64) -> Result<Url, url::ParseError> {
        self.storage_base.join(&format!("attach/{afid:08x}/file.xz"))
    }

    pub fn pack(
        &self,
        torrent_id: &str,
        pack_name: &str,
        archive: PackArchive,
    ) -> Result<Url, url::ParseError> {
        let encoded_name = utf8_percent_encode(pack_name, URI_COMPONENT);
        let encoded_id = utf8_percent_encode(torrent_id, URI_COMPONENT);
        match archive {
            PackArchive::Torrent => self.torrent_pack_base.join(&format!(
                "{TORRENT_PACK_KIND}/{encoded_id}/{encoded_name}_attachments.7z"
            )),
            PackArchive::Episode => self
                .storage_base
                .join(&format!("attachpk/{encoded_id}/{encoded_name}_attachments.7z")),
        }
    }

    pub fn primary(
        &self,
        torrent_id: &str,
        torrent_name: &str,
        file: &SubtitleFile,
    ) -> Result<Option<Url>, url::ParseError> {
        if file.is_pack {
            let pack_name = file.pack_name.as_deref().unwrap_or(torrent_name);
            return self
                .pack(torrent_id, pack_name, PackArchive::for_file(file))
                .map(Some);
        }

        file.afids
            .first()
            .map(|afid| self.attachment(*afid))
            .transpose()
    }
}
