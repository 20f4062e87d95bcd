//! Chunked payload transfer.
//!
//! Moves a payload of known length across the wire in 1024-byte chunks,
//! encrypting or decrypting each chunk on a CBC chain seeded with the
//! frame IV while accumulating a SHA-512 digest of the plaintext. Both
//! receive paths hash the zero-padded plaintext, so the digest matches
//! the sender's signature whichever path handled the payload.
//!
//! Any read that returns fewer bytes than requested is a fatal
//! [`ConnectionError::ShortRead`].

use sha2::{Digest, Sha512};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};

use ironwire_core::crypto::{
    padded_len, CbcStreamDecryptor, CbcStreamEncryptor, SessionKey, DIGEST_LEN, IV_LEN,
};
use ironwire_core::frame::CHUNK_SIZE;

use crate::error::ConnectionError;

/// A streamed payload spooled to backing temporary storage.
///
/// Exclusively owned by the one dispatch that received it; dropped when
/// the handler is done with it. The file cursor starts at the beginning.
pub struct SpooledPayload {
    file: tokio::fs::File,
    len: u64,
}

impl SpooledPayload {
    /// Decrypted payload length in bytes (includes zero padding).
    pub fn len(&self) -> u64 {
        self.len
    }

    /// True if the payload was empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Take ownership of the backing file.
    pub fn into_file(self) -> tokio::fs::File {
        self.file
    }

    /// Read the whole spooled payload into memory.
    pub async fn read_all(&mut self) -> Result<Vec<u8>, std::io::Error> {
        let mut buf = Vec::with_capacity(self.len as usize);
        self.file.read_to_end(&mut buf).await?;
        Ok(buf)
    }
}

impl std::fmt::Debug for SpooledPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpooledPayload").field("len", &self.len).finish()
    }
}

/// Send path: stream `plain_len` plaintext bytes from `source` to
/// `writer` in encrypted chunks.
///
/// Hashes the zero-padded plaintext and returns the digest for signing.
/// The bytes written equal `padded_len(plain_len)`. Fails if the source
/// ends before `plain_len` bytes were read.
pub async fn send_chunked<W, R>(
    writer: &mut W,
    source: &mut R,
    plain_len: u64,
    key: &SessionKey,
    iv: &[u8; IV_LEN],
) -> Result<[u8; DIGEST_LEN], ConnectionError>
where
    W: AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
{
    let mut encryptor = CbcStreamEncryptor::new(key, iv);
    let mut hasher = Sha512::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut remaining = plain_len;

    while remaining > 0 {
        let want = remaining.min(CHUNK_SIZE as u64) as usize;
        read_full(source, &mut buf[..want]).await?;

        let pad = (padded_len(want as u64) as usize) - want;
        hasher.update(&buf[..want]);
        hasher.update(&[0u8; 16][..pad]);

        let ciphertext = encryptor.encrypt_chunk(&buf[..want]);
        writer.write_all(&ciphertext).await?;

        remaining -= want as u64;
    }

    Ok(hasher.finalize().into())
}

/// Receive path, BUFFERED: one exact read of `data_length` ciphertext
/// bytes, decrypted whole, hashed.
pub async fn recv_buffered<R>(
    reader: &mut R,
    data_length: u64,
    key: &SessionKey,
    iv: &[u8; IV_LEN],
) -> Result<(Vec<u8>, [u8; DIGEST_LEN]), ConnectionError>
where
    R: AsyncRead + Unpin,
{
    let mut ciphertext = vec![0u8; data_length as usize];
    reader.read_exact(&mut ciphertext).await?;

    let plaintext = CbcStreamDecryptor::new(key, iv).decrypt_chunk(&ciphertext)?;
    let digest = Sha512::digest(&plaintext).into();
    Ok((plaintext, digest))
}

/// Receive path, STREAMED: `data_length` ciphertext bytes read in
/// chunk-size increments, decrypted and hashed incrementally into
/// backing temporary storage.
///
/// The returned digest equals what [`recv_buffered`] would produce for
/// the same wire bytes.
pub async fn recv_streamed<R>(
    reader: &mut R,
    data_length: u64,
    key: &SessionKey,
    iv: &[u8; IV_LEN],
) -> Result<(SpooledPayload, [u8; DIGEST_LEN]), ConnectionError>
where
    R: AsyncRead + Unpin,
{
    let spool = tempfile::tempfile()?;
    let mut file = tokio::fs::File::from_std(spool);

    let mut decryptor = CbcStreamDecryptor::new(key, iv);
    let mut hasher = Sha512::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut remaining = data_length;

    while remaining > 0 {
        let want = remaining.min(CHUNK_SIZE as u64) as usize;
        reader.read_exact(&mut buf[..want]).await?;

        let plaintext = decryptor.decrypt_chunk(&buf[..want])?;
        hasher.update(&plaintext);
        file.write_all(&plaintext).await?;

        remaining -= want as u64;
    }

    file.flush().await?;
    file.seek(std::io::SeekFrom::Start(0)).await?;

    Ok((
        SpooledPayload {
            file,
            len: data_length,
        },
        hasher.finalize().into(),
    ))
}

/// Fill `buf` completely, tolerating partial reads from the source but
/// failing on early EOF.
async fn read_full<R>(source: &mut R, buf: &mut [u8]) -> Result<(), ConnectionError>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = source.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(ConnectionError::ShortRead);
        }
        filled += n;
    }
    Ok(())
}
