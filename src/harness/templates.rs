//! Embedded Python runner templates.
//!
//! Harness files are assembled from these compile-time fragments plus the
//! user's test source. Placeholders (`__VIGIL_*__`) are substituted by the
//! generator; they are chosen so that no brace escaping is needed and an
//! unsubstituted placeholder is an immediate Python syntax or name error
//! rather than a silently wrong path.

/// `sys.path` setup so the spliced test source can import user modules from
/// the project root and the active test directory.
pub const PATH_SETUP: &str = r"
import sys
import os
sys.path.insert(0, r'__VIGIL_ROOT__')
sys.path.insert(0, r'__VIGIL_TEST_DIR__')
";

/// Timeout decorator available to test authors, plus the `signal` import
/// used by the runner's own per-test alarm.
pub const TIMEOUT_HELPER: &str = r"
import signal
from functools import wraps

def timeout(seconds=1):
    '''Per-test timeout decorator.'''
    def decorator(func):
        @wraps(func)
        def wrapper(*args, **kwargs):
            def handler(signum, frame):
                raise TimeoutError('test timed out after %ss' % seconds)
            signal.signal(signal.SIGALRM, handler)
            sec = int(seconds) if int(seconds) > 0 else 1
            signal.alarm(sec)
            try:
                return func(*args, **kwargs)
            finally:
                signal.alarm(0)
        return wrapper
    return decorator
";

/// Sweep runner: every test method in the file, one protocol line per
/// result. Failures are reported and swallowed — this flavor must never
/// abort the process on a failing test.
pub const SWEEP_RUNNER: &str = r"

if __name__ == '__main__':
    import inspect
    import unittest

    _module = sys.modules[__name__]
    _classes = [_obj for _name, _obj in inspect.getmembers(_module)
                if inspect.isclass(_obj) and issubclass(_obj, unittest.TestCase)
                and _obj is not unittest.TestCase]

    _target = __VIGIL_TARGET__
    _pairs = []
    for _cls in _classes:
        try:
            _names = unittest.TestLoader().getTestCaseNames(_cls)
        except Exception:
            continue
        if _target:
            if _target in _names:
                _pairs = [(_cls, _target)]
                break
        else:
            for _name in _names:
                _pairs.append((_cls, _name))

    if not _pairs:
        print('NO_TESTS_FOUND_IN_FILE', flush=True)
        sys.exit(0)

    _run_file = os.path.join(r'__VIGIL_SCRATCH__', '.run_tests')
    if os.path.exists(_run_file):
        with open(_run_file) as _fh:
            _only = set(_line.strip() for _line in _fh if _line.strip())
        _pairs = [(_c, _m) for _c, _m in _pairs if _m in _only]

    _manual_skip = set()
    _skip_file = os.path.join(r'__VIGIL_SCRATCH__', '.manual_skip')
    if os.path.exists(_skip_file):
        with open(_skip_file) as _fh:
            _manual_skip = set(_line.strip() for _line in _fh if _line.strip())

    try:
        _timeout_sec = int(os.environ.get('VIGIL_TIMEOUT', '0'))
    except ValueError:
        _timeout_sec = 0
    if os.environ.get('VIGIL_DEBUG') == '1':
        _timeout_sec = 0

    if hasattr(_module, 'setUpModule'):
        try:
            _module.setUpModule()
        except Exception as _exc:
            for _c, _m in _pairs:
                print('FAILED_METHOD: ' + _m, flush=True)
                print('  (setUpModule failed: %s)' % _exc)
            sys.exit(1)

    _setup_done = set()
    _setup_failed = set()
    for _cls, _method in _pairs:
        if _method in _manual_skip:
            print('skipped: ' + _method, flush=True)
            continue
        if _cls in _setup_failed:
            print('FAILED_METHOD: ' + _method, flush=True)
            print('  (setUpClass failed for this class)')
            continue
        if _cls not in _setup_done:
            _setup_done.add(_cls)
            try:
                _cls.setUpClass()
            except Exception as _exc:
                _setup_failed.add(_cls)
                print('FAILED_METHOD: ' + _method, flush=True)
                print('  (setUpClass failed: %s)' % _exc)
                continue
        try:
            _case = _cls(_method)
        except Exception:
            _case = _cls()
        try:
            _case.setUp()
        except Exception as _exc:
            print('FAILED_METHOD: ' + _method, flush=True)
            print('  (setUp failed: %s)' % _exc)
            continue
        _func = getattr(_case, _method)
        _expecting = getattr(_func, '__unittest_expecting_failure__', False)
        try:
            if _timeout_sec > 0:
                def _on_alarm(_signum, _frame):
                    raise TimeoutError('timed out after %ss' % _timeout_sec)
                signal.signal(signal.SIGALRM, _on_alarm)
                signal.alarm(_timeout_sec)
            _func()
            signal.alarm(0)
            if _expecting:
                print('FAILED_METHOD: ' + _method, flush=True)
            else:
                print('passed: ' + _method, flush=True)
        except unittest.SkipTest:
            signal.alarm(0)
            print('skipped: ' + _method, flush=True)
        except Exception:
            signal.alarm(0)
            if _expecting:
                print('passed: ' + _method, flush=True)
            else:
                print('FAILED_METHOD: ' + _method, flush=True)
        finally:
            try:
                _case.tearDown()
            except Exception:
                pass

    for _cls in _setup_done:
        if _cls not in _setup_failed:
            try:
                _cls.tearDownClass()
            except Exception:
                pass
    if hasattr(_module, 'tearDownModule'):
        try:
            _module.tearDownModule()
        except Exception:
            pass
";

/// Isolated runner: exactly one named method, with an execution-line trace
/// and a sentinel-bracketed failure summary. Re-raises on failure so the
/// full traceback reaches the caller.
pub const ISOLATED_RUNNER: &str = r"

if __name__ == '__main__':
    import inspect
    import linecache
    import traceback
    import unittest

    _module = sys.modules[__name__]
    _target = __VIGIL_TARGET__

    _cls = None
    for _name, _obj in inspect.getmembers(_module):
        if (inspect.isclass(_obj) and issubclass(_obj, unittest.TestCase)
                and _obj is not unittest.TestCase
                and _target in unittest.TestLoader().getTestCaseNames(_obj)):
            _cls = _obj
            break

    if _cls is None:
        print('NO_TESTS_FOUND_IN_FILE', flush=True)
        sys.exit(0)

    _debug = os.environ.get('VIGIL_DEBUG') == '1'

    def _line_trace(_frame, _event, _arg):
        if _event != 'line':
            return _line_trace
        if _frame.f_code.co_name != _target:
            return _line_trace
        _stmt = linecache.getline(_frame.f_code.co_filename, _frame.f_lineno).strip()
        for _marker in ('pudb', 'pdb', '_dbg', 'set_break', 'set_trace', '.error_summary'):
            if _marker in _stmt:
                return _line_trace
        print('[EXE] ' + _stmt, flush=True)
        return _line_trace

    if hasattr(_module, 'setUpModule'):
        try:
            _module.setUpModule()
        except Exception as _exc:
            print('FAILED_METHOD: ' + _target, flush=True)
            print('  (setUpModule failed: %s)' % _exc)
            sys.exit(1)

    try:
        _cls.setUpClass()
    except Exception as _exc:
        print('FAILED_METHOD: ' + _target, flush=True)
        print('  (setUpClass failed: %s)' % _exc)
        sys.exit(1)

    try:
        _case = _cls(_target)
    except Exception:
        _case = _cls()

    try:
        _case.setUp()
    except Exception as _exc:
        print('FAILED_METHOD: ' + _target, flush=True)
        print('  (setUp failed: %s)' % _exc)
        raise

    _func = getattr(_case, _target)
    _expecting = getattr(_func, '__unittest_expecting_failure__', False)

    try:
        _timeout_sec = int(os.environ.get('VIGIL_TIMEOUT', '0'))
    except ValueError:
        _timeout_sec = 0
    if _debug:
        _timeout_sec = 0

    try:
        if not _debug:
            print('___TEST_START___', flush=True)
            sys.settrace(_line_trace)
        if _timeout_sec > 0:
            def _on_alarm(_signum, _frame):
                raise TimeoutError('timed out after %ss' % _timeout_sec)
            signal.signal(signal.SIGALRM, _on_alarm)
            signal.alarm(_timeout_sec)
        _func()
        signal.alarm(0)
        sys.settrace(None)
        if _expecting:
            print('FAILED_METHOD: ' + _target, flush=True)
        else:
            print('passed: ' + _target, flush=True)
    except unittest.SkipTest:
        signal.alarm(0)
        sys.settrace(None)
        print('skipped: ' + _target, flush=True)
    except Exception as _exc:
        signal.alarm(0)
        sys.settrace(None)
        if _expecting:
            print('passed: ' + _target, flush=True)
        else:
            print('FAILED_METHOD: ' + _target, flush=True)
            print('___FAILURE_SUMMARY_START___', flush=True)

            def _is_stdlib(_path):
                return (_path.startswith('<') or '/lib/python' in _path
                        or 'site-packages' in _path or 'dist-packages' in _path)

            # Relevant frames only: this file (minus the runner) plus user
            # code, stopping once the trace descends into the stdlib.
            _shown = []
            for _frame in traceback.extract_tb(_exc.__traceback__):
                _same_file = os.path.basename(_frame.filename) == os.path.basename(__file__)
                if _same_file and _frame.name == '<module>':
                    continue
                if not _same_file and _is_stdlib(_frame.filename):
                    if _shown:
                        break
                    continue
                _shown.append(_frame)
            for _frame in _shown:
                print('%s:%s in %s' % (os.path.basename(_frame.filename), _frame.lineno, _frame.name))
                if _frame.line:
                    print('    ' + _frame.line)
            _msg = str(_exc).split('\n', 1)[0]
            if ' != ' in _msg:
                _actual, _expected = _msg.split(' != ', 1)
                print(type(_exc).__name__ + ':')
                print('  Actual:   ' + _actual)
                print('  Expected: ' + _expected)
            else:
                print('%s: %s' % (type(_exc).__name__, _msg))
            print('___FAILURE_SUMMARY_END___', flush=True)
            raise
    finally:
        try:
            _case.tearDown()
        except Exception:
            pass
        try:
            _cls.tearDownClass()
        except Exception:
            pass
        if hasattr(_module, 'tearDownModule'):
            try:
                _module.tearDownModule()
            except Exception:
                pass
";
