use std::time::Duration;

use afu_dma::backends::SimAfu;
use afu_dma::pipeline::first_mismatch;
use afu_dma::pipeline::EXPECTED_OUTPUT;
use afu_dma::regs;
use afu_dma::Afu;
use afu_dma::Error;
use afu_dma::Pipeline;
use afu_dma::PollConfig;

#[test]
fn all_ones_sum_to_sixteen() {
    let mut afu = Afu::simulated();
    for n in [128usize, 256, 1024, 128 * 97] {
        let outputs = Pipeline::run(&mut afu, n, &PollConfig::spin()).unwrap();
        assert_eq!(outputs.len(), n / 16);
        assert!(outputs.iter().all(|v| *v == EXPECTED_OUTPUT));
        assert_eq!(first_mismatch(&outputs), None);
    }
}

#[test]
fn spans_huge_page_sized_buffers() {
    // 4 MiB of input
    let n = 512 * 1024;
    let mut afu = Afu::simulated();
    let outputs = Pipeline::run(&mut afu, n, &PollConfig::spin()).unwrap();
    assert_eq!(outputs.len(), n / 16);
    assert_eq!(first_mismatch(&outputs), None);
}

#[test]
fn waits_for_done() {
    let mut afu = Afu::from_backend(SimAfu::new(regs::PIPELINE_AFU_ID).with_latency(20));
    let poll = PollConfig::sleep(Duration::from_micros(100));
    let outputs = Pipeline::run(&mut afu, 256, &poll).unwrap();
    assert_eq!(outputs, vec![EXPECTED_OUTPUT; 16]);
}

#[test]
fn size_register_holds_cache_lines() {
    let mut afu = Afu::simulated();
    let p = Pipeline::new(&mut afu, 640).unwrap();
    p.start(&mut afu).unwrap();
    assert_eq!(afu.read(regs::MMIO_SIZE).unwrap(), 80);
    p.wait(&afu, &PollConfig::spin()).unwrap();
    assert_eq!(p.outputs(), vec![EXPECTED_OUTPUT; 40]);
}

#[test]
fn go_with_bad_address_is_an_error() {
    let mut afu = Afu::simulated();
    let output = afu.malloc::<u64>(8).unwrap();
    afu.write(regs::MMIO_RD_ADDR, 0xdead_0000).unwrap();
    afu.write(regs::MMIO_WR_ADDR, output.iova()).unwrap();
    afu.write(regs::MMIO_SIZE, 16).unwrap();
    match afu.write(regs::MMIO_GO, 1) {
        Err(Error::InvalidDmaAddress { iova, len }) => {
            assert_eq!(iova, 0xdead_0000);
            assert_eq!(len, 16 * 64);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[cfg(feature = "async")]
#[test]
fn async_wait() {
    let mut afu = Afu::from_backend(SimAfu::new(regs::PIPELINE_AFU_ID).with_latency(8));
    let p = Pipeline::new(&mut afu, 128).unwrap();
    p.start(&mut afu).unwrap();
    async_io::block_on(p.wait_async(&afu, &PollConfig::spin())).unwrap();
    assert_eq!(p.outputs(), vec![EXPECTED_OUTPUT; 8]);
}
