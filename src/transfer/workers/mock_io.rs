use std::io::{self, Read};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::buildinfo::BuildInfo;
use crate::error::TransferError;
use crate::repo::{
    BuildInfoService, BuildSnapshot, RemoteIndex, RepoItem, SearchQuery, TransferService,
};
use crate::spec::BuildNumber;

// PartialReader yields data for `fail_after_reads` reads then errors, to simulate a dropped connection
pub struct PartialReader {
    data: Vec<u8>,
    pos: usize,
    fail_after_reads: usize,
    reads: usize,
}

impl PartialReader {
    pub fn new(data: &[u8], fail_after_reads: usize) -> Self {
        Self { data: data.to_vec(), pos: 0, fail_after_reads, reads: 0 }
    }
}

impl Read for PartialReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.reads >= self.fail_after_reads {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "simulated remote read failure",
            ));
        }
        self.reads += 1;
        if self.pos >= self.data.len() {
            return Ok(0);
        }
        let n = std::cmp::min(buf.len(), self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

fn unsupported<T>() -> Result<T, TransferError> {
    Err(TransferError::Unsupported("mock".to_string()))
}

// Serves one payload; the first `fail_first` fetches break mid-stream
pub struct FlakyRepository {
    data: Vec<u8>,
    fail_first: usize,
    fetches: AtomicUsize,
}

impl FlakyRepository {
    pub fn new(data: &[u8], fail_first: usize) -> Self {
        Self { data: data.to_vec(), fail_first, fetches: AtomicUsize::new(0) }
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl RemoteIndex for FlakyRepository {
    fn resolve(&self, _query: &SearchQuery) -> Result<Vec<RepoItem>, TransferError> {
        Ok(Vec::new())
    }
}

impl TransferService for FlakyRepository {
    fn fetch(&self, _remote_path: &str) -> Result<Box<dyn Read + Send>, TransferError> {
        let n = self.fetches.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_first {
            return Ok(Box::new(PartialReader::new(&self.data, 1)));
        }
        Ok(Box::new(io::Cursor::new(self.data.clone())))
    }

    fn store(
        &self,
        _remote_path: &str,
        _body: Box<dyn Read + Send>,
        _len: u64,
        _sha256: &str,
        _props: &[(String, String)],
    ) -> Result<(), TransferError> {
        unsupported()
    }

    fn create_dir(&self, _p: &str, _props: &[(String, String)]) -> Result<(), TransferError> {
        unsupported()
    }

    fn copy(&self, _from: &str, _to: &str) -> Result<(), TransferError> {
        unsupported()
    }

    fn move_item(&self, _from: &str, _to: &str) -> Result<(), TransferError> {
        unsupported()
    }

    fn delete(&self, _p: &str) -> Result<(), TransferError> {
        unsupported()
    }

    fn set_properties(&self, _p: &str, _props: &[(String, String)], _r: bool) -> Result<(), TransferError> {
        unsupported()
    }

    fn delete_properties(&self, _p: &str, _keys: &[String], _r: bool) -> Result<(), TransferError> {
        unsupported()
    }
}

impl BuildInfoService for FlakyRepository {
    fn build_snapshot(&self, name: &str, number: &BuildNumber) -> Result<BuildSnapshot, TransferError> {
        Err(TransferError::BuildNotFound { name: name.to_string(), number: number.to_string() })
    }

    fn publish_build(&self, _info: &BuildInfo) -> Result<(), TransferError> {
        unsupported()
    }
}

// Rejects every call with an authentication error and counts the calls
#[derive(Default)]
pub struct DenyingRepository {
    calls: AtomicUsize,
}

impl DenyingRepository {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn deny<T>(&self) -> Result<T, TransferError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(TransferError::FatalAuth("401 Unauthorized".to_string()))
    }
}

impl RemoteIndex for DenyingRepository {
    fn resolve(&self, _query: &SearchQuery) -> Result<Vec<RepoItem>, TransferError> {
        self.deny()
    }
}

impl TransferService for DenyingRepository {
    fn fetch(&self, _remote_path: &str) -> Result<Box<dyn Read + Send>, TransferError> {
        self.deny()
    }

    fn store(
        &self,
        _remote_path: &str,
        _body: Box<dyn Read + Send>,
        _len: u64,
        _sha256: &str,
        _props: &[(String, String)],
    ) -> Result<(), TransferError> {
        self.deny()
    }

    fn create_dir(&self, _p: &str, _props: &[(String, String)]) -> Result<(), TransferError> {
        self.deny()
    }

    fn copy(&self, _from: &str, _to: &str) -> Result<(), TransferError> {
        self.deny()
    }

    fn move_item(&self, _from: &str, _to: &str) -> Result<(), TransferError> {
        self.deny()
    }

    fn delete(&self, _p: &str) -> Result<(), TransferError> {
        self.deny()
    }

    fn set_properties(&self, _p: &str, _props: &[(String, String)], _r: bool) -> Result<(), TransferError> {
        self.deny()
    }

    fn delete_properties(&self, _p: &str, _keys: &[String], _r: bool) -> Result<(), TransferError> {
        self.deny()
    }
}

impl BuildInfoService for DenyingRepository {
    fn build_snapshot(&self, _name: &str, _number: &BuildNumber) -> Result<BuildSnapshot, TransferError> {
        self.deny()
    }

    fn publish_build(&self, _info: &BuildInfo) -> Result<(), TransferError> {
        self.deny()
    }
}

// Deletes succeed, except that a path containing "boom" panics mid-call
#[derive(Default)]
pub struct PanickingRepository {
    deletes: AtomicUsize,
}

impl PanickingRepository {
    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

impl RemoteIndex for PanickingRepository {
    fn resolve(&self, _query: &SearchQuery) -> Result<Vec<RepoItem>, TransferError> {
        Ok(Vec::new())
    }
}

impl TransferService for PanickingRepository {
    fn fetch(&self, _remote_path: &str) -> Result<Box<dyn Read + Send>, TransferError> {
        unsupported()
    }

    fn store(
        &self,
        _remote_path: &str,
        _body: Box<dyn Read + Send>,
        _len: u64,
        _sha256: &str,
        _props: &[(String, String)],
    ) -> Result<(), TransferError> {
        unsupported()
    }

    fn create_dir(&self, _p: &str, _props: &[(String, String)]) -> Result<(), TransferError> {
        unsupported()
    }

    fn copy(&self, _from: &str, _to: &str) -> Result<(), TransferError> {
        unsupported()
    }

    fn move_item(&self, _from: &str, _to: &str) -> Result<(), TransferError> {
        unsupported()
    }

    fn delete(&self, p: &str) -> Result<(), TransferError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if p.contains("boom") {
            panic!("index corrupted while deleting {}", p);
        }
        Ok(())
    }

    fn set_properties(&self, _p: &str, _props: &[(String, String)], _r: bool) -> Result<(), TransferError> {
        unsupported()
    }

    fn delete_properties(&self, _p: &str, _keys: &[String], _r: bool) -> Result<(), TransferError> {
        unsupported()
    }
}

impl BuildInfoService for PanickingRepository {
    fn build_snapshot(&self, name: &str, number: &BuildNumber) -> Result<BuildSnapshot, TransferError> {
        Err(TransferError::BuildNotFound { name: name.to_string(), number: number.to_string() })
    }

    fn publish_build(&self, _info: &BuildInfo) -> Result<(), TransferError> {
        unsupported()
    }
}
