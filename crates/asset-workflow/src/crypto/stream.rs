//! AES-128-CBC streaming transforms with PKCS#7 padding.
//!
//! `CbcEncryptWriter` buffers partial blocks and pads on `finish()`.
//! `CbcDecryptReader` decrypts as ciphertext arrives but withholds the last
//! block until EOF so the padding can be stripped and checked.

use std::io::{self, Read, Write};

use aes::Aes128;
use cbc::cipher::block_padding::{Pkcs7, RawPadding};
use cbc::cipher::generic_array::GenericArray;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};

use super::kdf::KEY_LEN;
use super::{CipherWrite, CryptoError};

/// AES block length in bytes.
pub const BLOCK_LEN: usize = 16;

const READ_CHUNK: usize = 8 * 1024;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// Encrypting writer. Call [`CipherWrite::finish`] to emit the padded tail.
pub struct CbcEncryptWriter<W: Write> {
    inner: W,
    cipher: Aes128CbcEnc,
    pending: Vec<u8>,
    finished: bool,
}

impl<W: Write> CbcEncryptWriter<W> {
    pub fn new(inner: W, key: &[u8; KEY_LEN], iv: &[u8; BLOCK_LEN]) -> Self {
        Self {
            inner,
            cipher: Aes128CbcEnc::new(GenericArray::from_slice(key), GenericArray::from_slice(iv)),
            pending: Vec::with_capacity(2 * BLOCK_LEN),
            finished: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    fn encrypt_aligned(&mut self, len: usize) -> io::Result<()> {
        for block in self.pending[..len].chunks_exact_mut(BLOCK_LEN) {
            self.cipher
                .encrypt_block_mut(GenericArray::from_mut_slice(block));
        }
        self.inner.write_all(&self.pending[..len])?;
        self.pending.drain(..len);
        Ok(())
    }
}

impl<W: Write> Write for CbcEncryptWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.finished {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "cipher stream already finished",
            ));
        }
        self.pending.extend_from_slice(buf);
        let aligned = self.pending.len() - self.pending.len() % BLOCK_LEN;
        if aligned > 0 {
            self.encrypt_aligned(aligned)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write + Send> CipherWrite for CbcEncryptWriter<W> {
    fn finish(&mut self) -> io::Result<()> {
        if self.finished {
            return Ok(());
        }
        // pending is always shorter than a block here; a full pad block is
        // appended when the plaintext is block aligned.
        let pos = self.pending.len();
        self.pending.resize(BLOCK_LEN, 0);
        Pkcs7::raw_pad(&mut self.pending[..BLOCK_LEN], pos);
        self.encrypt_aligned(BLOCK_LEN)?;
        self.finished = true;
        self.inner.flush()
    }
}

/// Decrypting reader over raw ciphertext.
pub struct CbcDecryptReader<R: Read> {
    inner: R,
    cipher: Aes128CbcDec,
    raw: Vec<u8>,
    out: Vec<u8>,
    out_pos: usize,
    held: Option<[u8; BLOCK_LEN]>,
    eof: bool,
}

impl<R: Read> CbcDecryptReader<R> {
    pub fn new(inner: R, key: &[u8; KEY_LEN], iv: &[u8; BLOCK_LEN]) -> Self {
        Self {
            inner,
            cipher: Aes128CbcDec::new(GenericArray::from_slice(key), GenericArray::from_slice(iv)),
            raw: Vec::with_capacity(READ_CHUNK + BLOCK_LEN),
            out: Vec::new(),
            out_pos: 0,
            held: None,
            eof: false,
        }
    }

    fn decrypt_available(&mut self) {
        let aligned = self.raw.len() - self.raw.len() % BLOCK_LEN;
        for chunk in self.raw[..aligned].chunks_exact_mut(BLOCK_LEN) {
            self.cipher
                .decrypt_block_mut(GenericArray::from_mut_slice(chunk));
            let mut block = [0u8; BLOCK_LEN];
            block.copy_from_slice(chunk);
            if let Some(prev) = self.held.replace(block) {
                self.out.extend_from_slice(&prev);
            }
        }
        self.raw.drain(..aligned);
    }

    fn finalize(&mut self) -> io::Result<()> {
        if !self.raw.is_empty() {
            return Err(CryptoError::Truncated(format!(
                "{} trailing bytes are not block aligned",
                self.raw.len()
            ))
            .into_io());
        }
        let last = self
            .held
            .take()
            .ok_or_else(|| CryptoError::Truncated("no cipher blocks".to_string()).into_io())?;
        let plain = Pkcs7::raw_unpad(&last).map_err(|_| CryptoError::Padding.into_io())?;
        self.out.extend_from_slice(plain);
        Ok(())
    }
}

impl<R: Read> Read for CbcDecryptReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.out_pos < self.out.len() {
                let n = buf.len().min(self.out.len() - self.out_pos);
                buf[..n].copy_from_slice(&self.out[self.out_pos..self.out_pos + n]);
                self.out_pos += n;
                return Ok(n);
            }
            self.out.clear();
            self.out_pos = 0;

            if self.eof || buf.is_empty() {
                return Ok(0);
            }

            let mut chunk = [0u8; READ_CHUNK];
            let n = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if n == 0 {
                self.eof = true;
                self.finalize()?;
            } else {
                self.raw.extend_from_slice(&chunk[..n]);
                self.decrypt_available();
            }
        }
    }
}
