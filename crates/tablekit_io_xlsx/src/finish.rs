//! Exactly-once finalize sequence: serialize, encrypt, close and clean up.
//!
//! Every step after the dispose notification records its failure into an
//! [`ErrorSlot`] and keeps going, so temp files and streams are released even
//! when serialization fails. The first captured failure is raised at the end.

use std::fs;
use std::io::Write;
use std::path::Path;

use rust_xlsxwriter::Workbook;

use crate::cache::remove_thread_local_cache;
use crate::conf::{C_TEMP_FILE_PREFIX, C_TEMP_FILE_SUFFIX};
use crate::context::WriteContext;
use crate::crypto::encrypt_package_to_ole;
use crate::error::{ErrorSlot, Result, XlsxWriteError};
use crate::spec::{EnumEncryptionPath, EnumExcelType, EnumOutputTarget, SpecFinishReport};

impl WriteContext {
    /// Finish the session.
    ///
    /// `if_on_exception` marks a finish caused by an upstream failure: the
    /// workbook is then only written when `if_write_excel_on_exception` is set.
    /// A repeated call does nothing and returns the default report.
    pub fn finish(&mut self, if_on_exception: bool) -> Result<SpecFinishReport> {
        if self.if_finished {
            return Ok(SpecFinishReport::default());
        }
        self.if_finished = true;
        log::debug!("Begin to finish write context, on exception: {if_on_exception}");

        let mut slot = ErrorSlot::default();
        let mut report = SpecFinishReport {
            if_performed: true,
            ..Default::default()
        };

        let result_dispose = self.notify(false, |handler, _| handler.after_workbook_dispose());
        slot.capture_result(result_dispose);

        if self.holder.if_initialized {
            self.finalize_workbook(if_on_exception, &mut slot, &mut report);
        }

        remove_thread_local_cache();
        slot.into_result()?;

        log::debug!("Finished write context: {report:?}");
        Ok(report)
    }

    fn finalize_workbook(&mut self, if_on_exception: bool, slot: &mut ErrorSlot, report: &mut SpecFinishReport) {
        let options = &self.holder.options;
        let if_write_excel = !if_on_exception || options.if_write_excel_on_exception;
        let c_password = options.password_effective().map(str::to_string);
        let if_xlsx = options.excel_type == EnumExcelType::Xlsx;
        let if_auto_close = options.if_auto_close_stream;
        let dir_temp = options.dir_temp.clone();

        let mut workbook = self.holder.workbook.take();
        let if_stream = self
            .holder
            .output
            .as_ref()
            .is_some_and(EnumOutputTarget::is_stream);

        // Stream target with password: encrypt through a private temp file.
        if if_write_excel
            && if_xlsx
            && if_stream
            && let Some(c_password) = &c_password
        {
            report.rule_encryption = EnumEncryptionPath::Stream;
            if let (Some(workbook), Some(EnumOutputTarget::Stream(stream))) =
                (workbook.as_mut(), self.holder.output.as_mut())
            {
                let result = write_encrypted_stream(workbook, stream, c_password, dir_temp.as_deref());
                report.if_written = result.is_ok();
                slot.capture_result(result);
            }
        }

        if report.rule_encryption == EnumEncryptionPath::None
            && if_write_excel
            && let Some(workbook) = workbook.as_mut()
        {
            let result = match self.holder.output.as_mut() {
                Some(EnumOutputTarget::File(path)) => workbook.save(path.as_path()).map_err(XlsxWriteError::from),
                Some(EnumOutputTarget::Stream(stream)) => write_plain_stream(workbook, stream),
                None => Err(XlsxWriteError::Config("output target already released".to_string())),
            };
            report.if_written = result.is_ok();
            slot.capture_result(result);
        }
        drop(workbook);

        if if_auto_close
            && if_stream
            && let Some(EnumOutputTarget::Stream(mut stream)) = self.holder.output.take()
        {
            slot.capture_result(stream.flush().map_err(XlsxWriteError::from));
            log::debug!("Closed output stream");
        }

        if report.if_written
            && report.rule_encryption == EnumEncryptionPath::None
            && if_xlsx
            && let Some(c_password) = &c_password
            && let Some(EnumOutputTarget::File(path)) = self.holder.output.as_ref()
        {
            report.rule_encryption = EnumEncryptionPath::File;
            slot.capture_result(encrypt_file_in_place(path, c_password));
        }

        if self.holder.template.take().is_some() {
            log::debug!("Released template workbook");
        }
    }
}

fn write_plain_stream(workbook: &mut Workbook, stream: &mut Box<dyn Write>) -> Result<()> {
    let v_bytes = workbook.save_to_buffer()?;
    stream.write_all(&v_bytes)?;
    stream.flush()?;
    Ok(())
}

/// Serialize to a private temp file, encrypt it into the stream, then delete it.
///
/// A deletion failure replaces any earlier failure of this step.
fn write_encrypted_stream(
    workbook: &mut Workbook,
    stream: &mut Box<dyn Write>,
    password: &str,
    dir_temp: Option<&Path>,
) -> Result<()> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(C_TEMP_FILE_PREFIX).suffix(C_TEMP_FILE_SUFFIX);
    let file_temp = match dir_temp {
        Some(dir) => builder.tempfile_in(dir)?,
        None => builder.tempfile()?,
    };
    let path_temp = file_temp.path().to_path_buf();
    log::debug!("Encrypting workbook through temp file {}", path_temp.display());

    let result_body = (|| -> Result<()> {
        workbook.save(&path_temp)?;
        let v_package = fs::read(&path_temp)?;
        let v_container = encrypt_package_to_ole(&v_package, password)?;
        stream.write_all(&v_container)?;
        stream.flush()?;
        Ok(())
    })();

    file_temp
        .close()
        .map_err(|source| XlsxWriteError::TempFileCleanup {
            path: path_temp.clone(),
            source,
        })?;
    log::debug!("Deleted temp file {}", path_temp.display());
    result_body
}

fn encrypt_file_in_place(path: &Path, password: &str) -> Result<()> {
    log::debug!("Encrypting workbook file {}", path.display());
    let v_package = fs::read(path)?;
    let v_container = encrypt_package_to_ole(&v_package, password)?;
    fs::write(path, v_container)?;
    Ok(())
}
