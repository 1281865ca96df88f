//! ECMA-376 Standard encryption of xlsx packages.
//!
//! The zip package is encrypted with AES-128 ECB under a SHA-1 derived key
//! and wrapped into an OLE compound file carrying `EncryptionInfo`,
//! `EncryptedPackage` and the `\u{6}DataSpaces` storage tree.

use std::io::{Cursor, Read, Write};

use aes::Aes128;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit, generic_array::GenericArray};
use rand::RngCore;
use rand::rngs::OsRng;
use sha1::{Digest, Sha1};

use crate::conf::{C_ENCRYPTION_CSP_NAME, N_ENCRYPTION_KEY_SIZE, N_ENCRYPTION_SPIN_COUNT};
use crate::error::{Result, XlsxWriteError};

const N_BLOCK_SIZE: usize = 16;
const N_SALT_SIZE: usize = 16;
const N_VERIFIER_HASH_SIZE: u32 = 20;
const N_FLAGS_AES: u32 = 0x24;
const N_ALG_ID_AES128: u32 = 0x660E;
const N_ALG_ID_HASH_SHA1: u32 = 0x8004;
const N_PROVIDER_TYPE_AES: u32 = 0x18;
const C_DATASPACES: &str = "\u{0006}DataSpaces";

/// OLE compound file signature.
pub const V_OLE_MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

struct SpecVerifier {
    salt: [u8; N_SALT_SIZE],
    encrypted_verifier: [u8; 16],
    encrypted_verifier_hash: [u8; 32],
}

////////////////////////////////////////////////////////////////////////////////
// #region Encrypt

/// Encrypt xlsx package bytes into an OLE container protected by `password`.
pub fn encrypt_package_to_ole(package_bytes: &[u8], password: &str) -> Result<Vec<u8>> {
    if package_bytes.is_empty() {
        return Err(XlsxWriteError::Crypto(
            "cannot encrypt empty xlsx package".to_string(),
        ));
    }

    let mut salt = [0u8; N_SALT_SIZE];
    let mut verifier = [0u8; 16];
    OsRng
        .try_fill_bytes(&mut salt)
        .map_err(|err| XlsxWriteError::Crypto(format!("failed to generate salt: {err}")))?;
    OsRng
        .try_fill_bytes(&mut verifier)
        .map_err(|err| XlsxWriteError::Crypto(format!("failed to generate verifier: {err}")))?;

    let key = derive_key(password, &salt);
    let cipher = derive_cipher(&key)?;

    let mut encrypted_verifier = verifier;
    cipher.encrypt_block(GenericArray::from_mut_slice(&mut encrypted_verifier));

    let hash_verifier = Sha1::digest(verifier);
    let mut encrypted_verifier_hash = [0u8; 32];
    encrypted_verifier_hash[..hash_verifier.len()].copy_from_slice(&hash_verifier);
    for chunk in encrypted_verifier_hash.chunks_mut(N_BLOCK_SIZE) {
        cipher.encrypt_block(GenericArray::from_mut_slice(chunk));
    }

    let v_info = build_encryption_info(&SpecVerifier {
        salt,
        encrypted_verifier,
        encrypted_verifier_hash,
    });
    let v_package = encrypt_package_stream(&cipher, package_bytes);

    build_ole_container(&v_info, &v_package)
}

fn derive_key(password: &str, salt: &[u8]) -> Vec<u8> {
    let v_password: Vec<u8> = password
        .encode_utf16()
        .flat_map(|ch| ch.to_le_bytes())
        .collect();

    let mut hash = Sha1::new().chain_update(salt).chain_update(&v_password).finalize();
    for n_iter in 0..N_ENCRYPTION_SPIN_COUNT {
        hash = Sha1::new()
            .chain_update(n_iter.to_le_bytes())
            .chain_update(hash)
            .finalize();
    }
    let hash_final = Sha1::new()
        .chain_update(hash)
        .chain_update(0u32.to_le_bytes())
        .finalize();

    let derive_xor_hash = |fill: u8| {
        let mut buf = [fill; 64];
        for (b, h) in buf.iter_mut().zip(hash_final.iter()) {
            *b ^= h;
        }
        Sha1::digest(buf)
    };
    let mut v_key = derive_xor_hash(0x36).to_vec();
    v_key.extend_from_slice(&derive_xor_hash(0x5c));
    v_key.truncate(N_ENCRYPTION_KEY_SIZE);
    v_key
}

fn derive_cipher(key: &[u8]) -> Result<Aes128> {
    Aes128::new_from_slice(key)
        .map_err(|_| XlsxWriteError::Crypto("invalid AES-128 key length".to_string()))
}

fn build_encryption_info(verifier: &SpecVerifier) -> Vec<u8> {
    let mut buf = Vec::with_capacity(256);
    buf.extend_from_slice(&4u16.to_le_bytes());
    buf.extend_from_slice(&2u16.to_le_bytes());
    buf.extend_from_slice(&N_FLAGS_AES.to_le_bytes());

    let mut v_header = Vec::with_capacity(160);
    for n_field in [
        N_FLAGS_AES,
        0,
        N_ALG_ID_AES128,
        N_ALG_ID_HASH_SHA1,
        (N_ENCRYPTION_KEY_SIZE * 8) as u32,
        N_PROVIDER_TYPE_AES,
        0,
        0,
    ] {
        v_header.extend_from_slice(&n_field.to_le_bytes());
    }
    for ch in C_ENCRYPTION_CSP_NAME.encode_utf16().chain(std::iter::once(0)) {
        v_header.extend_from_slice(&ch.to_le_bytes());
    }

    buf.extend_from_slice(&(v_header.len() as u32).to_le_bytes());
    buf.extend_from_slice(&v_header);

    buf.extend_from_slice(&(N_SALT_SIZE as u32).to_le_bytes());
    buf.extend_from_slice(&verifier.salt);
    buf.extend_from_slice(&verifier.encrypted_verifier);
    buf.extend_from_slice(&N_VERIFIER_HASH_SIZE.to_le_bytes());
    buf.extend_from_slice(&verifier.encrypted_verifier_hash);
    buf
}

fn encrypt_package_stream(cipher: &Aes128, data: &[u8]) -> Vec<u8> {
    let n_pad = N_BLOCK_SIZE - (data.len() % N_BLOCK_SIZE);

    let mut buf = Vec::with_capacity(8 + data.len() + n_pad);
    buf.extend_from_slice(&(data.len() as u64).to_le_bytes());
    buf.extend_from_slice(data);
    buf.resize(8 + data.len() + n_pad, n_pad as u8);

    for chunk in buf[8..].chunks_mut(N_BLOCK_SIZE) {
        cipher.encrypt_block(GenericArray::from_mut_slice(chunk));
    }
    buf
}

fn build_ole_container(encryption_info: &[u8], encrypted_package: &[u8]) -> Result<Vec<u8>> {
    let mut ole = cfb::CompoundFile::create(Cursor::new(Vec::new()))?;

    ole.create_stream("/EncryptionInfo")?
        .write_all(encryption_info)?;
    ole.create_stream("/EncryptedPackage")?
        .write_all(encrypted_package)?;

    let c_info = format!("/{C_DATASPACES}/DataSpaceInfo");
    let c_transform = format!("/{C_DATASPACES}/TransformInfo/StrongEncryptionTransform");
    ole.create_storage(format!("/{C_DATASPACES}"))?;
    ole.create_storage(&c_info)?;
    ole.create_storage(format!("/{C_DATASPACES}/TransformInfo"))?;
    ole.create_storage(&c_transform)?;

    ole.create_stream(format!("/{C_DATASPACES}/DataSpaceMap"))?
        .write_all(&build_dataspace_map())?;
    ole.create_stream(format!("{c_info}/StrongEncryptionDataSpace"))?
        .write_all(&build_dataspace_definition())?;
    ole.create_stream(format!("{c_transform}/\u{0006}Primary"))?
        .write_all(&build_transform_primary())?;
    ole.create_stream(format!("/{C_DATASPACES}/Version"))?
        .write_all(&build_dataspace_version())?;

    ole.flush()?;
    Ok(ole.into_inner().into_inner())
}

fn write_unicode_lpp4(buf: &mut Vec<u8>, s: &str) {
    let v_text: Vec<u8> = s.encode_utf16().flat_map(|ch| ch.to_le_bytes()).collect();
    buf.extend_from_slice(&(v_text.len() as u32).to_le_bytes());
    buf.extend_from_slice(&v_text);
    if v_text.len() % 4 == 2 {
        buf.extend_from_slice(&0u16.to_le_bytes());
    }
}

fn write_version_triplet(buf: &mut Vec<u8>) {
    for _ in 0..3 {
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
    }
}

fn build_dataspace_map() -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&8u32.to_le_bytes());
    buf.extend_from_slice(&1u32.to_le_bytes());

    let mut v_entry = Vec::new();
    v_entry.extend_from_slice(&1u32.to_le_bytes());
    v_entry.extend_from_slice(&0u32.to_le_bytes());
    write_unicode_lpp4(&mut v_entry, "EncryptedPackage");
    write_unicode_lpp4(&mut v_entry, "StrongEncryptionDataSpace");

    buf.extend_from_slice(&((v_entry.len() + 4) as u32).to_le_bytes());
    buf.extend_from_slice(&v_entry);
    buf
}

fn build_dataspace_definition() -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&8u32.to_le_bytes());
    buf.extend_from_slice(&1u32.to_le_bytes());
    write_unicode_lpp4(&mut buf, "StrongEncryptionTransform");
    buf
}

fn build_transform_primary() -> Vec<u8> {
    let mut v_header = Vec::new();
    v_header.extend_from_slice(&1u32.to_le_bytes());
    write_unicode_lpp4(&mut v_header, "{FF9A3F03-56EF-4613-BDD5-5A41C1D07246}");

    let mut buf = Vec::new();
    buf.extend_from_slice(&((v_header.len() + 4) as u32).to_le_bytes());
    buf.extend_from_slice(&v_header);
    write_unicode_lpp4(&mut buf, "Microsoft.Container.EncryptionTransform");
    write_version_triplet(&mut buf);

    buf.extend_from_slice(&0u32.to_le_bytes());
    buf.extend_from_slice(&0u32.to_le_bytes());
    buf.extend_from_slice(&0u32.to_le_bytes());
    buf.extend_from_slice(&4u32.to_le_bytes());
    buf
}

fn build_dataspace_version() -> Vec<u8> {
    let mut buf = Vec::new();
    write_unicode_lpp4(&mut buf, "Microsoft.Container.DataSpaces");
    write_version_triplet(&mut buf);
    buf
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Decrypt

/// Whether `bytes` start with the OLE compound file signature.
pub fn is_ole_container(bytes: &[u8]) -> bool {
    bytes.starts_with(&V_OLE_MAGIC)
}

/// Verify `password` and return the plain xlsx package of an encrypted container.
pub fn decrypt_package_from_ole(container: &[u8], password: &str) -> Result<Vec<u8>> {
    let mut ole = cfb::CompoundFile::open(Cursor::new(container))?;

    let mut v_info = Vec::new();
    ole.open_stream("/EncryptionInfo")?.read_to_end(&mut v_info)?;
    let mut v_package = Vec::new();
    ole.open_stream("/EncryptedPackage")?
        .read_to_end(&mut v_package)?;

    let verifier = parse_encryption_info(&v_info)?;
    let key = derive_key(password, &verifier.salt);
    let cipher = derive_cipher(&key)?;

    let mut v_verifier = verifier.encrypted_verifier;
    cipher.decrypt_block(GenericArray::from_mut_slice(&mut v_verifier));
    let mut v_hash = verifier.encrypted_verifier_hash;
    for chunk in v_hash.chunks_mut(N_BLOCK_SIZE) {
        cipher.decrypt_block(GenericArray::from_mut_slice(chunk));
    }
    let hash_expected = Sha1::digest(v_verifier);
    if v_hash[..hash_expected.len()] != hash_expected[..] {
        return Err(XlsxWriteError::Crypto("incorrect password".to_string()));
    }

    if v_package.len() < 8 + N_BLOCK_SIZE || (v_package.len() - 8) % N_BLOCK_SIZE != 0 {
        return Err(XlsxWriteError::Crypto(
            "EncryptedPackage has invalid length".to_string(),
        ));
    }
    let mut v_size = [0u8; 8];
    v_size.copy_from_slice(&v_package[..8]);
    let n_size = usize::try_from(u64::from_le_bytes(v_size))
        .map_err(|_| XlsxWriteError::Crypto("EncryptedPackage size overflow".to_string()))?;

    let mut v_plain = v_package[8..].to_vec();
    for chunk in v_plain.chunks_mut(N_BLOCK_SIZE) {
        cipher.decrypt_block(GenericArray::from_mut_slice(chunk));
    }
    if n_size > v_plain.len() {
        return Err(XlsxWriteError::Crypto(
            "decrypted stream smaller than declared size".to_string(),
        ));
    }
    v_plain.truncate(n_size);
    Ok(v_plain)
}

fn read_info_u32(info: &[u8], n_offset: usize) -> Result<u32> {
    read_info_slice(info, n_offset, 4)
        .and_then(|v| {
            <[u8; 4]>::try_from(v)
                .map_err(|_| XlsxWriteError::Crypto("EncryptionInfo stream too short".to_string()))
        })
        .map(u32::from_le_bytes)
}

fn read_info_slice(info: &[u8], n_offset: usize, n_len: usize) -> Result<&[u8]> {
    info.get(n_offset..n_offset + n_len)
        .ok_or_else(|| XlsxWriteError::Crypto("EncryptionInfo stream too short".to_string()))
}

fn parse_encryption_info(info: &[u8]) -> Result<SpecVerifier> {
    let n_header_size = read_info_u32(info, 8)? as usize;
    let mut n_offset = 12 + n_header_size;
    if read_info_u32(info, n_offset)? as usize != N_SALT_SIZE {
        return Err(XlsxWriteError::Crypto("unexpected salt size".to_string()));
    }
    n_offset += 4;

    let mut verifier = SpecVerifier {
        salt: [0u8; N_SALT_SIZE],
        encrypted_verifier: [0u8; 16],
        encrypted_verifier_hash: [0u8; 32],
    };
    verifier
        .salt
        .copy_from_slice(read_info_slice(info, n_offset, N_SALT_SIZE)?);
    n_offset += N_SALT_SIZE;
    verifier
        .encrypted_verifier
        .copy_from_slice(read_info_slice(info, n_offset, 16)?);
    n_offset += 16;
    if read_info_u32(info, n_offset)? != N_VERIFIER_HASH_SIZE {
        return Err(XlsxWriteError::Crypto(
            "unexpected verifier hash size".to_string(),
        ));
    }
    n_offset += 4;
    verifier
        .encrypted_verifier_hash
        .copy_from_slice(read_info_slice(info, n_offset, 32)?);
    Ok(verifier)
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_then_decrypt_recovers_package() {
        let v_plain = b"PK\x03\x04 not really a zip but any bytes will do".to_vec();
        let v_ole = encrypt_package_to_ole(&v_plain, "secret").unwrap();

        assert!(is_ole_container(&v_ole));
        assert_eq!(decrypt_package_from_ole(&v_ole, "secret").unwrap(), v_plain);
    }

    #[test]
    fn decrypt_rejects_wrong_password() {
        let v_ole = encrypt_package_to_ole(b"payload", "secret").unwrap();
        match decrypt_package_from_ole(&v_ole, "other") {
            Err(XlsxWriteError::Crypto(c_msg)) => assert!(c_msg.contains("password")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn encrypt_rejects_empty_package() {
        assert!(encrypt_package_to_ole(&[], "secret").is_err());
    }

    #[test]
    fn container_carries_dataspaces_tree() {
        let v_ole = encrypt_package_to_ole(b"payload", "pw").unwrap();
        let ole = cfb::CompoundFile::open(Cursor::new(v_ole)).unwrap();
        assert!(ole.is_stream("/EncryptionInfo"));
        assert!(ole.is_stream("/EncryptedPackage"));
        assert!(ole.is_storage("/\u{0006}DataSpaces/TransformInfo"));
        assert!(ole.is_stream(
            "/\u{0006}DataSpaces/TransformInfo/StrongEncryptionTransform/\u{0006}Primary"
        ));
    }
}
