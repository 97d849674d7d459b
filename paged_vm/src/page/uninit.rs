use std::sync::Arc;

use super::{AnonPage, FilePage, FileSegment, PageKind, VmType};
use crate::VmResult;

/// Initializer that is run on the first fault of a page
#[derive(Clone)]
pub enum PageInit {
    /// Fill the page with zeros
    Zero,
    /// Load the page from a file segment (executables and mmap)
    Segment(FileSegment),
    /// Fill the page with a custom initializer
    Custom(Arc<dyn Fn(&mut [u8]) -> VmResult<()> + Send + Sync>),
}

impl PageInit {
    pub(crate) fn run(&self, frame: &mut [u8]) -> VmResult<()> {
        match self {
            PageInit::Zero => {
                frame.fill(0);
                Ok(())
            }
            PageInit::Segment(segment) => segment.load(frame),
            PageInit::Custom(init) => {
                frame.fill(0);
                init(frame)
            }
        }
    }

    fn duplicate(&self) -> VmResult<Self> {
        Ok(match self {
            PageInit::Segment(segment) => PageInit::Segment(segment.reopen()?),
            other => other.clone(),
        })
    }
}

/// Page that was registered but never touched
pub(crate) struct UninitPage {
    target: VmType,
    init: PageInit,
}

impl UninitPage {
    pub(crate) fn new(target: VmType, init: PageInit) -> Self {
        Self { target, init }
    }

    /// Initializes `frame` and returns the backing the page turns into
    pub(crate) fn materialize(&self, frame: &mut [u8]) -> VmResult<PageKind> {
        self.init.run(frame)?;

        Ok(match &self.target {
            VmType::Anonymous => PageKind::Anonymous(AnonPage::new()),
            VmType::FileBacked(segment) => PageKind::FileBacked(FilePage::new(segment.clone())),
        })
    }

    pub(crate) fn duplicate(&self) -> VmResult<Self> {
        let target = match &self.target {
            VmType::Anonymous => VmType::Anonymous,
            VmType::FileBacked(segment) => VmType::FileBacked(segment.reopen()?),
        };

        Ok(Self {
            target,
            init: self.init.duplicate()?,
        })
    }
}
