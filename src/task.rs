// 该文件是 Dikuai （地块分割） 项目的一部分。
// src/task.rs - 后台分割任务
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::any::Any;
use std::error::Error as StdError;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use ndarray::Array4;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::JobConfig;
use crate::distribution::{Aggregator, ArchiveError};
use crate::model::{ClassMap, Model, ModelWrapper, ScoreError, argmax_classes};
use crate::output::{Render, TileExporter};
use crate::tensor::{PreparedTile, TILE_SIZE, TensorError};

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

#[derive(Error, Debug)]
pub enum JobError {
  #[error("模型加载失败: {0}")]
  ModelLoad(BoxError),
  #[error("张量准备失败: {0}")]
  Tensor(#[from] TensorError),
  #[error("推理失败: {0}")]
  Inference(BoxError),
  #[error("得分解析失败: {0}")]
  Score(#[from] ScoreError),
  #[error("导出失败: {0}")]
  Export(BoxError),
  #[error("归档失败: {0}")]
  Archive(#[from] ArchiveError),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("已有任务正在运行")]
  AlreadyRunning,
  #[error("无法启动任务线程: {0}")]
  Spawn(std::io::Error),
  #[error("任务线程崩溃: {0}")]
  Panicked(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum JobState {
  Idle = 0,
  Running = 1,
  Paused = 2,
  Stopped = 3,
  Finished = 4,
  Errored = 5,
}

impl JobState {
  fn from_u8(value: u8) -> Self {
    match value {
      1 => JobState::Running,
      2 => JobState::Paused,
      3 => JobState::Stopped,
      4 => JobState::Finished,
      5 => JobState::Errored,
      _ => JobState::Idle,
    }
  }

  pub fn is_active(&self) -> bool {
    matches!(self, JobState::Running | JobState::Paused)
  }

  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      JobState::Stopped | JobState::Finished | JobState::Errored
    )
  }
}

/// 发往界面的通知，顺序为进度、分布更新、结束
#[derive(Debug, Clone)]
pub enum JobEvent {
  Progress(u8),
  ResetProgress,
  UpdateDistribution(Vec<Arc<ClassMap>>),
  Finished(String),
  Error(String),
}

/// 控制状态：暂停只由 `state` 表示，停止标志单独保存且优先于暂停
#[derive(Debug)]
struct JobControl {
  stopped: AtomicBool,
  state: AtomicU8,
}

impl JobControl {
  fn new() -> Self {
    Self {
      stopped: AtomicBool::new(false),
      state: AtomicU8::new(JobState::Idle as u8),
    }
  }

  fn state(&self) -> JobState {
    JobState::from_u8(self.state.load(Ordering::Acquire))
  }

  fn set_state(&self, state: JobState) {
    self.state.store(state as u8, Ordering::Release);
  }

  /// 停止请求会解除暂停
  fn is_paused(&self) -> bool {
    self.state() == JobState::Paused && !self.is_stopped()
  }

  fn is_stopped(&self) -> bool {
    self.stopped.load(Ordering::Acquire)
  }

  fn reset(&self) {
    self.stopped.store(false, Ordering::Release);
  }
}

/// 可跨线程克隆的控制句柄
#[derive(Debug, Clone)]
pub struct JobController {
  control: Arc<JobControl>,
}

impl JobController {
  /// 仅在运行中生效
  pub fn pause(&self) {
    if self
      .control
      .state
      .compare_exchange(
        JobState::Running as u8,
        JobState::Paused as u8,
        Ordering::AcqRel,
        Ordering::Acquire,
      )
      .is_ok()
    {
      info!("请求暂停任务");
    }
  }

  /// 停止之后恢复无效
  pub fn resume(&self) {
    if self.control.is_stopped() {
      return;
    }
    if self
      .control
      .state
      .compare_exchange(
        JobState::Paused as u8,
        JobState::Running as u8,
        Ordering::AcqRel,
        Ordering::Acquire,
      )
      .is_ok()
    {
      info!("请求恢复任务");
    }
  }

  /// 在下一个瓦片开始前生效，正在处理的瓦片会完整写出
  pub fn stop(&self) {
    self.control.stopped.store(true, Ordering::Release);
    info!("请求停止任务");
  }

  pub fn state(&self) -> JobState {
    self.control.state()
  }
}

/// 后台线程中逐瓦片执行的循环
#[derive(Clone)]
struct TileLoop {
  control: Arc<JobControl>,
  events: Sender<JobEvent>,
  config: JobConfig,
}

impl TileLoop {
  fn emit(&self, event: JobEvent) {
    let _ = self.events.send(event);
  }

  fn fail(&self, err: JobError) {
    error!("任务出错: {}", err);
    self.control.set_state(JobState::Errored);
    self.emit(JobEvent::Error(err.to_string()));
  }

  /// 暂停期间以固定间隔轮询；返回 false 表示等待中收到了停止请求
  fn wait_while_paused(&self) -> bool {
    info!("任务已暂停");
    while self.control.is_paused() {
      if self.control.is_stopped() {
        return false;
      }
      thread::sleep(self.config.poll_interval());
    }
    if self.control.is_stopped() {
      return false;
    }
    info!("任务继续");
    true
  }

  fn halt(&self, aggregator: &Aggregator) {
    warn!("收到停止请求，已完成 {} 个瓦片", aggregator.len());
    if let Err(e) = aggregator.persist_distribution(self.config.distribution_path()) {
      warn!("写入类别分布失败: {}", e);
    }
    self.control.set_state(JobState::Stopped);
    self.emit(JobEvent::ResetProgress);
  }

  fn run<M, E, F>(self, loader: F, tiles: Vec<String>)
  where
    F: FnOnce() -> Result<M, E>,
    E: StdError + Send + Sync + 'static,
    M: Model<Input = Array4<f32>, Output = Array4<f32>>,
    M::Error: StdError + Send + Sync + 'static,
  {
    let now = Instant::now();
    let model = match loader() {
      Ok(model) => model,
      Err(e) => {
        self.fail(JobError::ModelLoad(Box::new(e)));
        return;
      }
    };
    info!("模型加载完成，耗时: {:.2?}", now.elapsed());

    let exporter = TileExporter::from_config(&self.config);
    let worker = self.clone();
    if let Err(e) = worker.run_task(tiles, model, exporter) {
      self.fail(e);
    }
  }
}

impl<ME, RE, M, O> Task<Vec<String>, M, O> for TileLoop
where
  ME: StdError + Send + Sync + 'static,
  RE: StdError + Send + Sync + 'static,
  M: Model<Input = Array4<f32>, Output = Array4<f32>, Error = ME>,
  O: Render<PreparedTile, ClassMap, Error = RE>,
{
  type Error = JobError;

  fn run_task(self, tiles: Vec<String>, model: M, output: O) -> Result<(), Self::Error> {
    let total = tiles.len();
    info!("开始任务: {} 个瓦片", total);
    std::fs::create_dir_all(&self.config.output_dir)?;
    std::fs::create_dir_all(&self.config.archive_dir)?;

    let mut aggregator = Aggregator::new();
    for (done, name) in tiles.iter().enumerate() {
      self.emit(JobEvent::Progress((done * 100 / total) as u8));

      if self.control.is_stopped() {
        self.halt(&aggregator);
        return Ok(());
      }
      if self.control.is_paused() && !self.wait_while_paused() {
        self.halt(&aggregator);
        return Ok(());
      }

      info!("处理第 {}/{} 个瓦片: {}", done + 1, total, name);
      let now = Instant::now();
      let tile = PreparedTile::load(self.config.tile_path(name))?;
      let scores = model
        .infer(&tile.tensor.data)
        .map_err(|e| JobError::Inference(Box::new(e)))?;
      let classes = argmax_classes(&scores, (TILE_SIZE, TILE_SIZE))?;
      let classes = tile.tensor.padding.crop(classes.view()).to_owned();
      let elapsed_a = now.elapsed();

      let classes = aggregator.push(classes);
      output
        .render_result(&tile, classes.as_ref())
        .map_err(|e| JobError::Export(Box::new(e)))?;
      self.emit(JobEvent::UpdateDistribution(aggregator.snapshot()));
      aggregator.persist_archive(self.config.archive_path())?;
      let elapsed_b = now.elapsed();
      info!("推理完成，耗时: {:.2?} / {:.2?}", elapsed_a, elapsed_b);
    }

    self.emit(JobEvent::Progress(100));
    aggregator.persist_distribution(self.config.distribution_path())?;
    debug!("最终类别分布: {:?}", aggregator.distribution());

    self.control.set_state(JobState::Finished);
    self.emit(JobEvent::Finished(format!(
      "分割完成，共处理 {} 个瓦片",
      aggregator.len()
    )));
    info!("任务完成，退出");
    Ok(())
  }
}

/// 可暂停、可停止的后台分割任务
///
/// 同一时间只允许一个运行中的任务；结束、停止或出错之后可以再次启动。
pub struct SegmentationJob {
  config: JobConfig,
  control: Arc<JobControl>,
  events: Sender<JobEvent>,
  worker: Option<JoinHandle<()>>,
}

impl SegmentationJob {
  pub fn new(config: JobConfig) -> (Self, Receiver<JobEvent>) {
    let (events, receiver) = mpsc::channel();
    let job = Self {
      config,
      control: Arc::new(JobControl::new()),
      events,
      worker: None,
    };
    (job, receiver)
  }

  pub fn config(&self) -> &JobConfig {
    &self.config
  }

  pub fn controller(&self) -> JobController {
    JobController {
      control: self.control.clone(),
    }
  }

  pub fn state(&self) -> JobState {
    self.control.state()
  }

  pub fn pause(&self) {
    self.controller().pause()
  }

  pub fn resume(&self) {
    self.controller().resume()
  }

  pub fn stop(&self) {
    self.controller().stop()
  }

  /// 以 URL 或文件路径加载模型并开始处理
  pub fn start(&mut self, model: &str, tiles: Vec<String>) -> Result<(), JobError> {
    let location = model.to_string();
    self.start_with(move || ModelWrapper::from_location(&location), tiles)
  }

  /// 模型在后台线程中由 `loader` 构建一次，供整个任务使用
  pub fn start_with<M, E, F>(&mut self, loader: F, tiles: Vec<String>) -> Result<(), JobError>
  where
    F: FnOnce() -> Result<M, E> + Send + 'static,
    E: StdError + Send + Sync + 'static,
    M: Model<Input = Array4<f32>, Output = Array4<f32>> + 'static,
    M::Error: StdError + Send + Sync + 'static,
  {
    if self.state().is_active() {
      return Err(JobError::AlreadyRunning);
    }
    self.join_worker();

    self.control.reset();
    self.control.set_state(JobState::Running);

    let tile_loop = TileLoop {
      control: self.control.clone(),
      events: self.events.clone(),
      config: self.config.clone(),
    };
    let guard = tile_loop.clone();
    let handle = thread::Builder::new()
      .name("segmentation-job".to_string())
      .spawn(move || {
        let outcome = panic::catch_unwind(AssertUnwindSafe(move || tile_loop.run(loader, tiles)));
        if let Err(payload) = outcome {
          guard.fail(JobError::Panicked(panic_message(payload.as_ref())));
        }
      })
      .map_err(|e| {
        self.control.set_state(JobState::Errored);
        JobError::Spawn(e)
      })?;
    self.worker = Some(handle);
    Ok(())
  }

  /// 等待后台线程退出并返回最终状态
  pub fn wait(&mut self) -> JobState {
    self.join_worker();
    self.state()
  }

  fn join_worker(&mut self) {
    if let Some(handle) = self.worker.take()
      && handle.join().is_err()
    {
      error!("任务线程异常退出");
      self.control.set_state(JobState::Errored);
    }
  }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(message) = payload.downcast_ref::<&str>() {
    message.to_string()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    "未知错误".to_string()
  }
}

impl Drop for SegmentationJob {
  fn drop(&mut self) {
    if self.worker.is_some() {
      self.stop();
      self.join_worker();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn controller(state: JobState) -> JobController {
    let control = Arc::new(JobControl::new());
    control.set_state(state);
    JobController { control }
  }

  #[test]
  fn pause_only_applies_to_running_jobs() {
    let idle = controller(JobState::Idle);
    idle.pause();
    assert_eq!(idle.state(), JobState::Idle);
    assert!(!idle.control.is_paused());

    let running = controller(JobState::Running);
    running.pause();
    assert_eq!(running.state(), JobState::Paused);
    assert!(running.control.is_paused());

    running.resume();
    assert_eq!(running.state(), JobState::Running);
    assert!(!running.control.is_paused());
  }

  #[test]
  fn interleaved_pause_and_resume_never_strand_the_loop() {
    let job = controller(JobState::Running);
    let workers: Vec<_> = (0..4)
      .map(|_| {
        let job = job.clone();
        thread::spawn(move || {
          for _ in 0..1000 {
            job.pause();
            job.resume();
          }
        })
      })
      .collect();
    for worker in workers {
      worker.join().unwrap();
    }

    job.resume();
    assert_eq!(job.state(), JobState::Running);
    assert!(!job.control.is_paused());
  }

  #[test]
  fn panic_payloads_become_messages() {
    let from_str = panic::catch_unwind(|| panic!("boom")).unwrap_err();
    assert_eq!(panic_message(from_str.as_ref()), "boom");
    let from_string = panic::catch_unwind(|| panic!("tile {}", 7)).unwrap_err();
    assert_eq!(panic_message(from_string.as_ref()), "tile 7");
  }

  #[test]
  fn resume_after_stop_has_no_effect() {
    let job = controller(JobState::Running);
    job.pause();
    job.stop();
    assert!(!job.control.is_paused());
    assert!(job.control.is_stopped());

    job.resume();
    assert_eq!(job.state(), JobState::Paused);
  }

  #[test]
  fn state_round_trips_through_atomic() {
    for state in [
      JobState::Idle,
      JobState::Running,
      JobState::Paused,
      JobState::Stopped,
      JobState::Finished,
      JobState::Errored,
    ] {
      assert_eq!(JobState::from_u8(state as u8), state);
    }
  }
}
