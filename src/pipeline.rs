//! The DMA pipeline demo: stream an array of ones through the AFU and read
//! back one sum per 16 inputs.

use crate::dmb;
use crate::regs;
use crate::Afu;
use crate::DmaBuffer;
use crate::Error;
use crate::PollConfig;
use crate::Result;

/// Rejected input count on the command line.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum UsageError {
    #[error("{0:?} is not a positive integer")]
    NotPositive(String),
    #[error("{0} is not a multiple of {m}", m = regs::INPUT_MULTIPLE)]
    NotMultiple(u64),
}

/// Parse the number of inputs: a positive decimal integer that is a
/// multiple of 128.
pub fn parse_num_inputs(s: &str) -> std::result::Result<u64, UsageError> {
    let n = s
        .parse::<u64>()
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| UsageError::NotPositive(s.to_string()))?;
    if n % regs::INPUT_MULTIPLE != 0 {
        return Err(UsageError::NotMultiple(n));
    }
    Ok(n)
}

/// Value every output holds when every input is 1.
pub const EXPECTED_OUTPUT: u64 = regs::INPUTS_PER_OUTPUT as u64;

/// Input and output arrays of one transfer.
#[derive(Debug)]
pub struct Pipeline {
    input: DmaBuffer,
    output: DmaBuffer,
    num_inputs: usize,
    num_outputs: usize,
    cache_lines: usize,
}

impl Pipeline {
    /// Allocate both arrays, set every input to 1 and every output to 0.
    pub fn new(afu: &mut Afu, num_inputs: usize) -> Result<Pipeline> {
        let num_outputs = num_inputs / regs::INPUTS_PER_OUTPUT;

        let elem = std::mem::size_of::<u64>();
        let bytes = num_inputs.checked_mul(elem).ok_or(Error::AllocSize {
            count: num_inputs,
            elem,
        })?;

        let mut input = afu.malloc::<u64>(num_inputs)?;
        let mut output = afu.malloc::<u64>(num_outputs)?;
        input.fill(1u64);
        output.fill(0u64);

        Ok(Pipeline {
            input,
            output,
            num_inputs,
            num_outputs,
            cache_lines: regs::cache_lines(bytes),
        })
    }

    pub fn num_inputs(&self) -> usize {
        self.num_inputs
    }

    pub fn num_outputs(&self) -> usize {
        self.num_outputs
    }

    /// Input size as the AFU counts it.
    pub fn cache_lines(&self) -> usize {
        self.cache_lines
    }

    /// Program the addresses and size, then start the AFU.
    pub fn start(&self, afu: &mut Afu) -> Result<()> {
        // make the initialised arrays visible before the AFU may read them
        dmb();
        afu.write(regs::MMIO_RD_ADDR, self.input.iova())?;
        afu.write(regs::MMIO_WR_ADDR, self.output.iova())?;
        afu.write(regs::MMIO_SIZE, self.cache_lines() as u64)?;
        afu.write(regs::MMIO_GO, 1)?;
        tracing::info!(
            "started transfer of {} inputs ({} cache lines)",
            self.num_inputs,
            self.cache_lines()
        );
        Ok(())
    }

    pub fn wait(&self, afu: &Afu, poll: &PollConfig) -> Result<()> {
        afu.wait_until_nonzero(regs::MMIO_DONE, poll)?;
        Ok(())
    }

    #[cfg(feature = "async")]
    pub async fn wait_async(&self, afu: &Afu, poll: &PollConfig) -> Result<()> {
        afu.wait_until_nonzero_async(regs::MMIO_DONE, poll).await?;
        Ok(())
    }

    pub fn outputs(&self) -> Vec<u64> {
        (0..self.num_outputs)
            .map(|i| self.output.read_volatile::<u64>(i))
            .collect()
    }

    /// Allocate, start, wait for completion and return the outputs.
    pub fn run(afu: &mut Afu, num_inputs: usize, poll: &PollConfig) -> Result<Vec<u64>> {
        let pipeline = Pipeline::new(afu, num_inputs)?;
        pipeline.start(afu)?;
        pipeline.wait(afu, poll)?;
        Ok(pipeline.outputs())
    }
}

/// Index and value of the first output that is not [`EXPECTED_OUTPUT`].
pub fn first_mismatch(outputs: &[u64]) -> Option<(usize, u64)> {
    outputs
        .iter()
        .copied()
        .enumerate()
        .find(|(_, v)| *v != EXPECTED_OUTPUT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_multiples_of_128() {
        assert_eq!(parse_num_inputs("128"), Ok(128));
        assert_eq!(parse_num_inputs("4096"), Ok(4096));
    }

    #[test]
    fn rejects_everything_else() {
        assert_eq!(parse_num_inputs("100"), Err(UsageError::NotMultiple(100)));
        assert_eq!(parse_num_inputs("129"), Err(UsageError::NotMultiple(129)));
        for bad in ["0", "-128", "", "abc", "128abc", "12.8", " 128"] {
            assert_eq!(
                parse_num_inputs(bad),
                Err(UsageError::NotPositive(bad.to_string())),
                "{bad:?}"
            );
        }
    }

    #[test]
    fn usage_messages() {
        assert_eq!(
            UsageError::NotMultiple(100).to_string(),
            "100 is not a multiple of 128"
        );
        assert_eq!(
            UsageError::NotPositive("x".into()).to_string(),
            "\"x\" is not a positive integer"
        );
    }

    #[test]
    fn sizes() {
        let mut afu = Afu::simulated();
        let p = Pipeline::new(&mut afu, 384).unwrap();
        assert_eq!(p.num_outputs(), 24);
        assert_eq!(p.cache_lines(), 48);
        assert_eq!(p.outputs(), vec![0; 24]);
    }

    #[test]
    fn oversized_input_is_an_error() {
        let mut afu = Afu::simulated();
        let n = usize::MAX / 4;
        assert!(matches!(
            Pipeline::new(&mut afu, n),
            Err(Error::AllocSize { count, elem: 8 }) if count == n
        ));
    }

    #[test]
    fn mismatch() {
        assert_eq!(first_mismatch(&[16, 16, 16]), None);
        assert_eq!(first_mismatch(&[16, 15, 0]), Some((1, 15)));
    }
}
